//! The model-wide coordinator: one lock, one condition variable, and the
//! deadlock detector.
//!
//! Every channel's buffer and every blocked counter lives in a single
//! [`ModelState`] behind the coordinator's mutex. Tasks suspend on the
//! coordinator's condition variable, and so does
//! [`Coordinator::run_until_deadlock_or_stop`], which wakes on every
//! blocking transition and re-evaluates:
//!
//! ```text
//!             active == read_blocked + write_blocked ?
//!                         │ yes
//!              ┌──────────┴──────────────┐
//!      write_blocked > 0          write_blocked == 0
//!              │                         │
//!   grow the smallest write-     open feeds and readers
//!   blocked queue, wake its      waiting on them?
//!   writer, keep running          ├─ yes: keep waiting
//!                                 └─ no:  real deadlock,
//!                                         terminate every channel
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, trace, warn};
use serde::Serialize;

use crate::channel::{Channel, ChannelFlags, ChannelId, ChannelInfo, ChannelState, ExternalFeed};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::lifecycle::{RunOutcome, RunPhase};
use crate::task::ActorId;
use crate::time::CompletionTime;

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Times every active actor was found blocked.
    pub stalls: u64,
    /// Artificial deadlocks resolved by growing a queue.
    pub capacity_escalations: u64,
    /// Largest capacity any escalation produced.
    pub largest_capacity: usize,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStats,
    /// Channel snapshots taken when the run ended.
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stall {
    Artificial,
    AwaitingEnvironment,
    Real,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

pub(crate) struct ModelState<T> {
    channels: Vec<ChannelState<T>>,
    actors: Vec<String>,
    read_blocked: usize,
    external_read_blocked: usize,
    write_blocked: usize,
    /// Write-blocked channels in the order they blocked.
    write_blocked_set: Vec<ChannelId>,
    active_actors: usize,
    open_feeds: usize,
    completion_time: CompletionTime,
    phase: RunPhase,
    stop_requested: bool,
    failure: Option<KernelError>,
    stats: RunStats,
}

impl<T> ModelState<T> {
    pub(crate) fn new(completion_time: CompletionTime) -> Self {
        ModelState {
            channels: Vec::new(),
            actors: Vec::new(),
            read_blocked: 0,
            external_read_blocked: 0,
            write_blocked: 0,
            write_blocked_set: Vec::new(),
            active_actors: 0,
            open_feeds: 0,
            completion_time,
            phase: RunPhase::Idle,
            stop_requested: false,
            failure: None,
            stats: RunStats::default(),
        }
    }

    pub(crate) fn add_channel(&mut self, channel: ChannelState<T>) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels.push(channel);
        id
    }

    /// # Panics
    /// If `id` was issued by another coordinator.
    pub(crate) fn channel(&self, id: ChannelId) -> &ChannelState<T> {
        &self.channels[id.0]
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> &mut ChannelState<T> {
        &mut self.channels[id.0]
    }

    pub(crate) fn register_read_blocked(&mut self, id: ChannelId) {
        let channel = &mut self.channels[id.0];
        if channel.read_pending {
            return;
        }
        channel.read_pending = true;
        self.read_blocked += 1;
        if channel.flags().contains(ChannelFlags::FROM_ENVIRONMENT) {
            self.external_read_blocked += 1;
        }
        trace!("{}: reader blocked ({} read-blocked)", channel.name(), self.read_blocked);
    }

    /// Returns `true` if a reader was blocked on `id`.
    pub(crate) fn unregister_read_blocked(&mut self, id: ChannelId) -> bool {
        let channel = &mut self.channels[id.0];
        if !channel.read_pending {
            return false;
        }
        channel.read_pending = false;
        self.read_blocked -= 1;
        if channel.flags().contains(ChannelFlags::FROM_ENVIRONMENT) {
            self.external_read_blocked -= 1;
        }
        true
    }

    pub(crate) fn register_write_blocked(&mut self, id: ChannelId) {
        let channel = &mut self.channels[id.0];
        if channel.write_pending {
            return;
        }
        channel.write_pending = true;
        self.write_blocked += 1;
        self.write_blocked_set.push(id);
        trace!("{}: writer blocked ({} write-blocked)", channel.name(), self.write_blocked);
    }

    /// Returns `true` if a writer was blocked on `id`.
    pub(crate) fn unregister_write_blocked(&mut self, id: ChannelId) -> bool {
        let channel = &mut self.channels[id.0];
        if !channel.write_pending {
            return false;
        }
        channel.write_pending = false;
        self.write_blocked -= 1;
        self.write_blocked_set.retain(|&c| c != id);
        true
    }

    /// Marks a channel terminated and clears its blocks, so the woken
    /// parties are no longer counted.
    pub(crate) fn terminate_channel(&mut self, id: ChannelId) {
        self.channels[id.0].terminate();
        self.unregister_read_blocked(id);
        self.unregister_write_blocked(id);
    }

    fn terminate_all(&mut self) {
        for index in 0..self.channels.len() {
            self.terminate_channel(ChannelId(index));
        }
    }

    fn is_stalled(&self) -> bool {
        self.active_actors > 0 && self.active_actors == self.read_blocked + self.write_blocked
    }

    fn classify(&self) -> Stall {
        if self.write_blocked > 0 {
            Stall::Artificial
        } else if self.external_read_blocked > 0 && self.open_feeds > 0 {
            Stall::AwaitingEnvironment
        } else {
            Stall::Real
        }
    }

    /// Grows the smallest write-blocked queue (first blocked wins ties) and
    /// releases its writer. Returns the channel grown, or `None` if nothing
    /// is write-blocked.
    ///
    /// # Errors
    /// `CapacityExceeded` if the new capacity would pass `max_capacity`
    /// (`0` means no limit).
    pub(crate) fn increment_lowest_capacity_port(
        &mut self,
        max_capacity: usize,
    ) -> KernelResult<Option<ChannelId>> {
        let Some(id) = self
            .write_blocked_set
            .iter()
            .copied()
            .min_by_key(|&id| self.channels[id.0].capacity())
        else {
            return Ok(None);
        };
        let channel = &mut self.channels[id.0];
        let capacity = channel.capacity();
        let grown = if capacity == 0 { 1 } else { capacity.saturating_mul(2) };
        if max_capacity > 0 && grown > max_capacity {
            return Err(KernelError::CapacityExceeded {
                channel: channel.name().to_string(),
                requested: grown,
                maximum: max_capacity,
            });
        }
        debug!("{}: growing queue {} -> {}", channel.name(), capacity, grown);
        channel.set_capacity(grown);
        self.unregister_write_blocked(id);
        self.stats.capacity_escalations += 1;
        self.stats.largest_capacity = self.stats.largest_capacity.max(grown);
        Ok(Some(id))
    }

    pub(crate) fn completion(&self) -> CompletionTime {
        self.completion_time
    }

    fn snapshot(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, c)| c.info(ChannelId(i)))
            .collect()
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            stats: self.stats,
            channels: self.snapshot(),
        }
    }

    fn actor(&self, actor: ActorId) -> KernelResult<&str> {
        self.actors
            .get(actor.0)
            .map(String::as_str)
            .ok_or_else(|| KernelError::actor_failed(actor.to_string(), "not part of this model"))
    }

    fn endpoint(&self, actor: Option<ActorId>) -> KernelResult<&str> {
        actor.map_or(Ok("env"), |a| self.actor(a))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────────────────────────────────────

/// Owns all shared model state and decides when a stalled model is
/// deadlocked.
///
/// Shared as `Arc<Coordinator<T>>` between the host thread, every actor
/// task, and every [`Channel`] handle.
pub struct Coordinator<T> {
    state: Mutex<ModelState<T>>,
    wakeup: Condvar,
    config: KernelConfig,
}

impl<T> Coordinator<T> {
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new(Coordinator {
            state: Mutex::new(ModelState::new(config.completion())),
            wakeup: Condvar::new(),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> KernelResult<MutexGuard<'_, ModelState<T>>> {
        Ok(self.state.lock()?)
    }

    /// Lock that survives poisoning; used on exit paths that must always
    /// update the counters.
    fn lock_for_exit(&self) -> MutexGuard<'_, ModelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, ModelState<T>>,
    ) -> KernelResult<MutexGuard<'a, ModelState<T>>> {
        Ok(self.wakeup.wait(guard)?)
    }

    pub(crate) fn notify(&self) {
        self.wakeup.notify_all();
    }

    // ── Topology ─────────────────────────────────────────────────────────

    /// Registers an actor name. Names appear in channel names and logs.
    pub fn register_actor(&self, name: impl Into<String>) -> KernelResult<ActorId> {
        let mut state = self.lock()?;
        if !state.phase.is_idle() {
            return Err(KernelError::TopologyFrozen);
        }
        let id = ActorId(state.actors.len());
        state.actors.push(name.into());
        Ok(id)
    }

    pub fn actor_name(&self, actor: ActorId) -> KernelResult<String> {
        Ok(self.lock()?.actor(actor)?.to_string())
    }

    /// Creates a channel from `source` to `sink`. Its priority among the
    /// sink's inputs is its position in connection order.
    pub fn new_channel(self: &Arc<Self>, source: ActorId, sink: ActorId) -> KernelResult<Channel<T>> {
        let id = self.add_channel(Some(source), Some(sink), ChannelFlags::empty())?;
        Ok(Channel::new(id, Arc::clone(self)))
    }

    /// Creates a channel written from outside the model.
    pub fn new_feed(self: &Arc<Self>, sink: ActorId) -> KernelResult<ExternalFeed<T>> {
        let id = self.add_channel(None, Some(sink), ChannelFlags::FROM_ENVIRONMENT)?;
        self.lock()?.open_feeds += 1;
        Ok(ExternalFeed::new(Channel::new(id, Arc::clone(self))))
    }

    /// Creates an unbounded channel read from outside the model.
    pub fn new_tap(self: &Arc<Self>, source: ActorId) -> KernelResult<Channel<T>> {
        let id = self.add_channel(Some(source), None, ChannelFlags::TO_ENVIRONMENT)?;
        Ok(Channel::new(id, Arc::clone(self)))
    }

    fn add_channel(
        &self,
        source: Option<ActorId>,
        sink: Option<ActorId>,
        flags: ChannelFlags,
    ) -> KernelResult<ChannelId> {
        let mut state = self.lock()?;
        if !state.phase.is_idle() {
            return Err(KernelError::TopologyFrozen);
        }
        let priority = match sink {
            Some(_) => state.channels.iter().filter(|c| c.sink == sink).count() as u32,
            None => 0,
        };
        let name = format!(
            "{}->{}#{}",
            state.endpoint(source)?,
            state.endpoint(sink)?,
            priority
        );
        debug!("New channel {} (capacity {}, {:?})", name, self.config.initial_capacity, flags);
        let channel = ChannelState::new(
            name,
            source,
            sink,
            self.config.initial_capacity,
            priority,
            flags,
        );
        Ok(state.add_channel(channel))
    }

    // ── Control ──────────────────────────────────────────────────────────

    /// Sets the model completion time and pushes it into every channel.
    pub fn set_completion_time(&self, completion: CompletionTime) -> KernelResult<()> {
        let mut state = self.lock()?;
        state.completion_time = completion;
        for channel in &mut state.channels {
            channel.set_completion_time(completion);
        }
        Ok(())
    }

    pub fn completion_time(&self) -> KernelResult<CompletionTime> {
        Ok(self.lock()?.completion_time)
    }

    /// Terminates every channel. Blocked tasks unwind and the run ends with
    /// [`RunOutcome::Stopped`].
    pub fn request_stop(&self) -> KernelResult<()> {
        let mut state = self.lock()?;
        if !state.stop_requested {
            info!("Stop requested");
            state.stop_requested = true;
            state.terminate_all();
        }
        self.notify();
        Ok(())
    }

    pub fn is_stopping(&self) -> KernelResult<bool> {
        Ok(self.lock()?.stop_requested)
    }

    pub fn phase(&self) -> KernelResult<RunPhase> {
        Ok(self.lock()?.phase)
    }

    pub fn stats(&self) -> KernelResult<RunStats> {
        Ok(self.lock()?.stats)
    }

    pub fn channel_info(&self, id: ChannelId) -> KernelResult<ChannelInfo> {
        Ok(self.lock()?.channel(id).info(id))
    }

    pub fn channels(&self) -> KernelResult<Vec<ChannelInfo>> {
        Ok(self.lock()?.snapshot())
    }

    // ── Run lifecycle ────────────────────────────────────────────────────

    /// Freezes topology and primes counters for `actors` tasks. Queued
    /// events (initial tokens, placeholders) are kept.
    pub(crate) fn begin_run(&self, actors: usize) -> KernelResult<()> {
        let mut state = self.lock()?;
        if !state.phase.is_idle() {
            return Err(KernelError::TopologyFrozen);
        }
        let completion = state.completion_time;
        for channel in &mut state.channels {
            channel.set_completion_time(completion);
        }
        state.active_actors = actors;
        state.stats = RunStats::default();
        state.phase = RunPhase::Running;
        info!(
            "Run started: {} actors, {} channels, completion {}",
            actors,
            state.channels.len(),
            completion
        );
        Ok(())
    }

    pub(crate) fn feed_closed(&self) -> KernelResult<()> {
        let mut state = self.lock()?;
        state.open_feeds = state.open_feeds.saturating_sub(1);
        self.notify();
        Ok(())
    }

    pub(crate) fn task_finished(&self, actor: &str) {
        let mut state = self.lock_for_exit();
        state.active_actors = state.active_actors.saturating_sub(1);
        debug!("{}: finished ({} still active)", actor, state.active_actors);
        self.notify();
    }

    /// Records a fatal error. The first one wins; every channel is
    /// terminated so the remaining tasks unwind.
    pub(crate) fn report_failure(&self, err: KernelError) {
        let mut state = self.lock_for_exit();
        if state.failure.is_none() {
            error!("Run failed: {}", err);
            state.failure = Some(err);
            state.terminate_all();
        }
        self.notify();
    }

    /// Blocks until the run completes, deadlocks for real, is stopped, or
    /// fails. Artificial deadlocks are resolved along the way.
    ///
    /// # Errors
    /// The first fatal error reported by a task, or `CapacityExceeded` if
    /// deadlock recovery hits the configured maximum.
    pub fn run_until_deadlock_or_stop(&self) -> KernelResult<RunReport> {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => return Err(self.abort(e)),
        };
        loop {
            if let Some(err) = state.failure.clone() {
                state.phase = RunPhase::Terminated;
                return Err(err);
            }
            if state.stop_requested {
                state.phase = RunPhase::Terminated;
                info!("Run stopped");
                return Ok(state.report(RunOutcome::Stopped));
            }
            if state.active_actors == 0 {
                state.phase = RunPhase::Terminated;
                info!("Run completed");
                return Ok(state.report(RunOutcome::Completed));
            }

            if state.is_stalled() {
                if state.phase != RunPhase::StallDetected {
                    state.phase = RunPhase::StallDetected;
                    state.stats.stalls += 1;
                }
                let stall = state.classify();
                trace!(
                    "Stall: {} active, {} read-blocked ({} external), {} write-blocked: {:?}",
                    state.active_actors,
                    state.read_blocked,
                    state.external_read_blocked,
                    state.write_blocked,
                    stall
                );
                match stall {
                    Stall::Artificial => {
                        match state.increment_lowest_capacity_port(self.config.max_capacity) {
                            Ok(_) => {
                                state.phase = RunPhase::Running;
                                self.notify();
                                continue;
                            }
                            Err(err) => {
                                error!("Artificial deadlock unresolvable: {}", err);
                                state.failure = Some(err.clone());
                                state.terminate_all();
                                state.phase = RunPhase::Terminated;
                                self.notify();
                                return Err(err);
                            }
                        }
                    }
                    Stall::AwaitingEnvironment => {
                        debug!("Stalled on open feeds, waiting for the environment");
                    }
                    Stall::Real => {
                        warn!(
                            "Real deadlock: {} actors blocked reading",
                            state.read_blocked
                        );
                        state.terminate_all();
                        state.phase = RunPhase::Terminated;
                        self.notify();
                        return Ok(state.report(RunOutcome::RealDeadlock));
                    }
                }
            } else if state.phase == RunPhase::StallDetected {
                state.phase = RunPhase::Running;
            }

            state = match self.wait(state) {
                Ok(state) => state,
                Err(e) => return Err(self.abort(e)),
            };
        }
    }

    /// Tears the model down after the lock was poisoned.
    fn abort(&self, err: KernelError) -> KernelError {
        let mut state = self.lock_for_exit();
        state.terminate_all();
        state.phase = RunPhase::Terminated;
        self.notify();
        err
    }
}
