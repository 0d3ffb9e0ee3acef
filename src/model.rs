//! Model builder: actors, channels, and one run.

use std::sync::Arc;

use log::{debug, warn};

use crate::channel::{Channel, ChannelId, ExternalFeed};
use crate::config::{KernelConfig, CONFIG};
use crate::coordinator::{Coordinator, RunReport};
use crate::error::{KernelError, KernelResult};
use crate::task::{Actor, ActorId, ActorTask, Troupe};
use crate::time::CompletionTime;

struct ActorSlot<T> {
    id: ActorId,
    name: String,
    actor: Box<dyn Actor<T>>,
    inputs: Vec<ChannelId>,
    outputs: Vec<Channel<T>>,
}

/// A static topology of actors and channels, built before the run.
///
/// ```no_run
/// use dde_kernel::{Actor, FiringContext, Input, KernelConfig, KernelResult, Model};
///
/// struct Print;
/// impl Actor<u32> for Print {
///     fn fire(&mut self, ctx: &mut FiringContext<'_, u32>, input: Option<Input<u32>>) -> KernelResult<()> {
///         if let Some(input) = input {
///             println!("{} {:?}", ctx.current_time(), input.event.payload);
///         }
///         Ok(())
///     }
/// }
///
/// # fn main() -> KernelResult<()> {
/// let mut model = Model::new(KernelConfig::default());
/// let sink = model.add_actor("print", Print)?;
/// let feed = model.feed(sink)?;
/// feed.send(7, 1.0.into())?;
/// feed.close()?;
/// let report = model.run()?;
/// println!("{:?}", report.outcome);
/// # Ok(())
/// # }
/// ```
pub struct Model<T> {
    coordinator: Arc<Coordinator<T>>,
    slots: Vec<ActorSlot<T>>,
}

impl<T: Send + 'static> Model<T> {
    pub fn new(config: KernelConfig) -> Self {
        Model {
            coordinator: Coordinator::new(config),
            slots: Vec::new(),
        }
    }

    /// A model using the process-wide [`CONFIG`].
    pub fn with_default_config() -> Self {
        Self::new(CONFIG.clone())
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    pub fn add_actor(&mut self, name: impl Into<String>, actor: impl Actor<T> + 'static) -> KernelResult<ActorId> {
        let name = name.into();
        let id = self.coordinator.register_actor(name.clone())?;
        self.slots.push(ActorSlot {
            id,
            name,
            actor: Box::new(actor),
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        Ok(id)
    }

    /// Connects the next output port of `from` to the next input port of
    /// `to`. Later connections into `to` get higher priority.
    pub fn connect(&mut self, from: ActorId, to: ActorId) -> KernelResult<Channel<T>> {
        self.slot(from)?;
        self.slot(to)?;
        let channel = self.coordinator.new_channel(from, to)?;
        self.slot(from)?.outputs.push(channel.clone());
        self.slot(to)?.inputs.push(channel.id());
        Ok(channel)
    }

    /// Adds an input port on `to` written by the host.
    pub fn feed(&mut self, to: ActorId) -> KernelResult<ExternalFeed<T>> {
        self.slot(to)?;
        let feed = self.coordinator.new_feed(to)?;
        self.slot(to)?.inputs.push(feed.channel().id());
        Ok(feed)
    }

    /// Adds an output port on `from` read by the host.
    pub fn tap(&mut self, from: ActorId) -> KernelResult<Channel<T>> {
        self.slot(from)?;
        let channel = self.coordinator.new_tap(from)?;
        self.slot(from)?.outputs.push(channel.clone());
        Ok(channel)
    }

    pub fn set_completion_time(&self, time: f64) -> KernelResult<()> {
        self.coordinator.set_completion_time(CompletionTime::At(time))
    }

    fn slot(&mut self, id: ActorId) -> KernelResult<&mut ActorSlot<T>> {
        self.slots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| KernelError::actor_failed(id.to_string(), "not part of this model"))
    }

    /// Spawns every actor, supervises until the run ends, and joins.
    pub fn run(self) -> KernelResult<RunReport> {
        let Model { coordinator, slots } = self;
        coordinator.begin_run(slots.len())?;

        let mut troupe = Troupe::new(coordinator.config().thread_name_prefix.clone());
        let mut pending = slots.into_iter();
        while let Some(slot) = pending.next() {
            let name = slot.name.clone();
            let spawned = ActorTask::new(
                slot.name,
                slot.actor,
                slot.inputs,
                slot.outputs,
                Arc::clone(&coordinator),
            )
            .and_then(|task| troupe.spawn(task));
            if let Err(e) = spawned {
                coordinator.report_failure(e);
                coordinator.task_finished(&name);
                for rest in pending.by_ref() {
                    coordinator.task_finished(&rest.name);
                }
                break;
            }
        }
        debug!("Spawned {} actor threads", troupe.len());

        let report = coordinator.run_until_deadlock_or_stop();
        for (thread, exit) in troupe.wait() {
            if exit.is_failed() {
                warn!("{}: {}", thread, exit);
            } else {
                debug!("{}: {}", thread, exit);
            }
        }
        report
    }
}
