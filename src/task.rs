//! Actor tasks: one OS thread per actor.
//!
//! An [`ActorTask`] drives its [`Actor`] through the kernel:
//!
//! ```text
//! loop {
//!     input pass: ClockKeeper picks the next readable channel (may block)
//!     actor.fire(ctx, input)     → sends stamped with the output time
//!     actor.postfire(ctx)?       → false ends the loop
//! }
//! finish: INACTIVE on every output, terminate every input
//! ```
//!
//! A task also ends when every input is `INACTIVE`, when a stop is
//! requested, or when a blocking call unwinds with the termination signal.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, trace};
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelId};
use crate::clock::ClockKeeper;
use crate::coordinator::Coordinator;
use crate::error::{KernelError, KernelResult};
use crate::event::{Event, Payload};
use crate::lifecycle::TaskExit;
use crate::time::Time;

/// Identifies an actor within one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub(crate) usize);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// An event handed to [`Actor::fire`], with the input port it arrived on.
///
/// Ports are numbered in connection order.
#[derive(Debug, Clone, PartialEq)]
pub struct Input<T> {
    pub port: usize,
    pub event: Event<T>,
}

impl<T> Input<T> {
    pub fn time(&self) -> Time {
        self.event.time
    }

    /// The real token, or `None` for a null event.
    pub fn into_token(self) -> Option<T> {
        self.event.payload.into_token()
    }
}

/// User computation driven by an [`ActorTask`].
///
/// The kernel never looks inside tokens. Errors returned from `fire` are
/// fatal to the run, except [`KernelError::Terminated`], which only ends
/// this task.
pub trait Actor<T>: Send {
    /// Handles one consumed event. Actors without inputs are fired with
    /// `None`.
    fn fire(&mut self, ctx: &mut FiringContext<'_, T>, input: Option<Input<T>>) -> KernelResult<()>;

    /// Returns whether to keep iterating.
    fn postfire(&mut self, _ctx: &FiringContext<'_, T>) -> bool {
        true
    }
}

/// What an actor can do while firing.
pub struct FiringContext<'a, T> {
    keeper: &'a mut ClockKeeper,
    outputs: &'a [Channel<T>],
    coordinator: &'a Coordinator<T>,
}

impl<'a, T> FiringContext<'a, T> {
    pub fn actor(&self) -> &str {
        self.keeper.actor()
    }

    pub fn current_time(&self) -> Time {
        self.keeper.current_time()
    }

    pub fn output_time(&mut self) -> Time {
        self.keeper.output_time()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn keeper(&self) -> &ClockKeeper {
        &*self.keeper
    }

    /// Moves this actor's clock forward. Used by actors without inputs to
    /// pace what they produce.
    pub fn advance_to(&mut self, time: f64) -> KernelResult<()> {
        self.keeper.set_current_time(Time::At(time))
    }

    /// Sends `token` on output `port`, stamped with the output time.
    /// Blocks while the channel is full.
    pub fn send(&mut self, port: usize, token: T) -> KernelResult<()> {
        let time = self.keeper.output_time();
        self.output(port)?.put(Payload::Real(token), time)
    }

    /// Sends `token` stamped `delay` after the current time.
    pub fn send_delayed(&mut self, port: usize, token: T, delay: f64) -> KernelResult<()> {
        let base = self.keeper.current_time().value().unwrap_or(0.0);
        self.keeper.set_output_time(Time::At(base + delay))?;
        self.send(port, token)
    }

    /// Sends a placeholder that is sequenced but does not drive time.
    pub fn send_ignore(&mut self, port: usize, token: T) -> KernelResult<()> {
        self.output(port)?.put(Payload::Real(token), Time::Ignore)
    }

    /// Sends a clone of `token` on every output.
    pub fn broadcast(&mut self, token: T) -> KernelResult<()>
    where
        T: Clone,
    {
        for port in 0..self.outputs.len() {
            self.send(port, token.clone())?;
        }
        Ok(())
    }

    pub fn is_stopping(&self) -> KernelResult<bool> {
        self.coordinator.is_stopping()
    }

    fn output(&self, port: usize) -> KernelResult<&Channel<T>> {
        self.outputs
            .get(port)
            .ok_or_else(|| KernelError::actor_failed(self.keeper.actor(), format!("no output port {port}")))
    }
}

/// Counts the task out of the run even if the actor panics.
struct ExitGuard<'a, T> {
    coordinator: &'a Coordinator<T>,
    actor: &'a str,
}

impl<T> Drop for ExitGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.coordinator
                .report_failure(KernelError::actor_failed(self.actor, "panicked"));
        }
        self.coordinator.task_finished(self.actor);
    }
}

/// Drives one actor on its own thread.
pub struct ActorTask<T> {
    name: String,
    actor: Box<dyn Actor<T>>,
    keeper: ClockKeeper,
    inputs: Vec<ChannelId>,
    outputs: Vec<Channel<T>>,
    coordinator: Arc<Coordinator<T>>,
}

impl<T: Send + 'static> ActorTask<T> {
    pub(crate) fn new(
        name: String,
        actor: Box<dyn Actor<T>>,
        inputs: Vec<ChannelId>,
        outputs: Vec<Channel<T>>,
        coordinator: Arc<Coordinator<T>>,
    ) -> KernelResult<Self> {
        let mut keeper = ClockKeeper::new(name.clone());
        {
            let state = coordinator.lock()?;
            for &input in &inputs {
                keeper.add_input(input, &state);
            }
        }
        for output in &outputs {
            keeper.add_output(output.id());
        }
        Ok(ActorTask {
            name,
            actor,
            keeper,
            inputs,
            outputs,
            coordinator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the actor to completion. Always counts the task out of the run.
    pub fn run(mut self) -> TaskExit {
        let coordinator = Arc::clone(&self.coordinator);
        let name = self.name.clone();
        let _guard = ExitGuard {
            coordinator: &coordinator,
            actor: &name,
        };
        debug!("{}: started", name);

        let exit = match self.iterate() {
            Ok(()) => TaskExit::Finished,
            Err(e) if e.is_termination() => TaskExit::Terminated,
            Err(e) => {
                error!("{}: {}", name, e);
                let reason = e.to_string();
                coordinator.report_failure(e);
                TaskExit::Failed(reason)
            }
        };
        self.finish();
        debug!("{}: exit {}", name, exit);
        exit
    }

    fn iterate(&mut self) -> KernelResult<()> {
        loop {
            if self.coordinator.is_stopping()? {
                return Err(KernelError::Terminated);
            }
            let input = if self.inputs.is_empty() {
                None
            } else {
                match self.keeper.next_input(&*self.coordinator)? {
                    Some((channel, event)) => Some(Input {
                        port: self.port_of(channel),
                        event,
                    }),
                    None => {
                        debug!("{}: all inputs inactive", self.name);
                        return Ok(());
                    }
                }
            };

            let mut ctx = FiringContext {
                keeper: &mut self.keeper,
                outputs: &self.outputs,
                coordinator: &self.coordinator,
            };
            self.actor.fire(&mut ctx, input)?;
            if !self.actor.postfire(&ctx) {
                debug!("{}: postfire returned false", self.name);
                return Ok(());
            }
            if self.is_done()? {
                return Ok(());
            }
        }
    }

    /// Nothing this actor produces can be delivered any more: its clock is
    /// past the completion time, or every output has closed.
    fn is_done(&self) -> KernelResult<bool> {
        let state = self.coordinator.lock()?;
        let now = self.keeper.current_time();
        if state.completion().is_exceeded_by(now) {
            debug!("{}: {} is past completion", self.name, now);
            return Ok(true);
        }
        let outputs_closed = !self.outputs.is_empty()
            && self.outputs.iter().all(|output| {
                let channel = state.channel(output.id());
                channel.is_closed() || channel.is_terminated()
            });
        if outputs_closed {
            debug!("{}: every output closed", self.name);
        }
        Ok(outputs_closed)
    }

    fn port_of(&self, channel: ChannelId) -> usize {
        self.inputs.iter().position(|&c| c == channel).unwrap_or_default()
    }

    /// Best effort: downstream sees `INACTIVE`, upstream writers unwind.
    fn finish(&mut self) {
        for output in &self.outputs {
            if let Err(e) = output.put(Payload::Advance, Time::Inactive) {
                trace!("{}: INACTIVE not delivered to {}: {}", self.name, output.id(), e);
            }
        }
        for &input in &self.inputs {
            if let Err(e) = self.coordinator.request_finish(input) {
                trace!("{}: could not finish {}: {}", self.name, input, e);
            }
        }
    }
}

/// The set of actor threads in one run.
///
/// Threads are named "{prefix}-{actor}".
pub struct Troupe {
    prefix: String,
    threads: Vec<(String, JoinHandle<TaskExit>)>,
}

impl Troupe {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            threads: Vec::new(),
        }
    }

    /// Spawns `task` on a new named thread.
    pub fn spawn<T: Send + 'static>(&mut self, task: ActorTask<T>) -> KernelResult<()> {
        let name = format!("{}-{}", self.prefix, task.name());
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || task.run())
            .map_err(|e| KernelError::actor_failed(name.as_str(), format!("failed to spawn thread: {e}")))?;
        self.threads.push((name, handle));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Joins every thread and returns how each one exited.
    pub fn wait(self) -> Vec<(String, TaskExit)> {
        self.threads
            .into_iter()
            .map(|(name, handle)| {
                let exit = handle
                    .join()
                    .unwrap_or_else(|_| TaskExit::Failed("panicked".to_string()));
                (name, exit)
            })
            .collect()
    }
}
