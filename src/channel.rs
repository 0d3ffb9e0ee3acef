//! Timed channels: bounded, time-ordered FIFO queues between two actors.
//!
//! A channel has no lock of its own. Its state lives inside the
//! coordinator's [`ModelState`], and every operation here runs under the
//! coordinator's single mutex. Suspension uses the coordinator's condition
//! variable:
//!
//! ```text
//! put  on a full channel   → register write-blocked → wait → re-check
//! has_token on empty       → register read-blocked  → wait → re-check
//! ```
//!
//! Whoever removes a block (a reader freeing room, a writer delivering a
//! token, the coordinator growing a queue, `request_finish`) updates the
//! blocked counters *before* notifying, so the deadlock detector never sees a
//! woken task still counted as blocked.

use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::clock::ClockKeeper;
use crate::coordinator::{Coordinator, ModelState};
use crate::error::{KernelError, KernelResult};
use crate::event::{Event, Payload};
use crate::task::ActorId;
use crate::time::{CompletionTime, Time};

/// Identifies a channel within one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

bitflags! {
    /// Boundary classification, computed once when the channel is wired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChannelFlags: u8 {
        /// Written by code outside the model through an [`ExternalFeed`].
        const FROM_ENVIRONMENT = 1 << 0;
        /// Read by code outside the model after (or during) a run.
        const TO_ENVIRONMENT = 1 << 1;
    }
}

impl ChannelFlags {
    /// Boundary channels never apply backpressure.
    #[inline]
    pub fn is_boundary(self) -> bool {
        self.intersects(ChannelFlags::FROM_ENVIRONMENT | ChannelFlags::TO_ENVIRONMENT)
    }
}

/// A point-in-time snapshot of a channel, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub source: Option<ActorId>,
    pub sink: Option<ActorId>,
    pub len: usize,
    pub capacity: usize,
    pub priority: u32,
    pub receiver_time: Time,
    pub last_time: Time,
    pub completion_time: CompletionTime,
    pub flags: ChannelFlags,
    pub terminated: bool,
    pub read_pending: bool,
    pub write_pending: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Buffer state (always accessed under the coordinator lock)
// ────────────────────────────────────────────────────────────────────────────

pub(crate) struct ChannelState<T> {
    name: String,
    pub(crate) source: Option<ActorId>,
    pub(crate) sink: Option<ActorId>,
    queue: VecDeque<Event<T>>,
    capacity: usize,
    /// Timestamp of the most recently accepted event, sentinel or not.
    last_time: Time,
    /// Most recent real timestamp; the monotonicity floor for puts.
    last_real: f64,
    receiver_time: Time,
    completion_time: CompletionTime,
    priority: u32,
    flags: ChannelFlags,
    terminated: bool,
    pub(crate) read_pending: bool,
    pub(crate) write_pending: bool,
    ignore_seen: bool,
}

impl<T> ChannelState<T> {
    pub(crate) fn new(
        name: String,
        source: Option<ActorId>,
        sink: Option<ActorId>,
        capacity: usize,
        priority: u32,
        flags: ChannelFlags,
    ) -> Self {
        ChannelState {
            name,
            source,
            sink,
            queue: VecDeque::new(),
            capacity,
            last_time: Time::ZERO,
            last_real: 0.0,
            receiver_time: Time::ZERO,
            completion_time: CompletionTime::NotStarted,
            priority,
            flags,
            terminated: false,
            read_pending: false,
            write_pending: false,
            ignore_seen: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub(crate) fn priority(&self) -> u32 {
        self.priority
    }

    pub(crate) fn flags(&self) -> ChannelFlags {
        self.flags
    }

    pub(crate) fn receiver_time(&self) -> Time {
        self.receiver_time
    }

    pub(crate) fn last_time(&self) -> Time {
        self.last_time
    }

    pub(crate) fn set_completion_time(&mut self, completion: CompletionTime) {
        self.completion_time = completion;
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn terminate(&mut self) {
        self.terminated = true;
    }

    /// An `INACTIVE` event has been accepted; nothing may follow it.
    pub(crate) fn is_closed(&self) -> bool {
        self.last_time == Time::Inactive
    }

    pub(crate) fn has_room(&self) -> bool {
        self.flags.is_boundary() || self.queue.len() < self.capacity
    }

    pub(crate) fn head_is_advance(&self) -> bool {
        self.queue.front().is_some_and(|e| e.payload.is_advance())
    }

    /// Validates a put timestamp and applies the completion cut-off.
    pub(crate) fn admit_time(&self, time: Time) -> KernelResult<Time> {
        if time.is_invalid() {
            return Err(KernelError::NegativeTime {
                context: self.name.clone(),
                time: time.value().unwrap_or(f64::NAN),
            });
        }
        if let Time::At(t) = time {
            if t < self.last_real {
                return Err(KernelError::TimeRegression {
                    channel: self.name.clone(),
                    time: t,
                    last: self.last_real,
                });
            }
        }
        if self.completion_time.is_exceeded_by(time) {
            trace!(
                "{}: {} is past completion {}, delivering INACTIVE",
                self.name,
                time,
                self.completion_time
            );
            return Ok(Time::Inactive);
        }
        Ok(time)
    }

    /// Appends an admitted event. The caller has checked `has_room`.
    pub(crate) fn accept(&mut self, event: Event<T>) {
        let was_empty = self.queue.is_empty();
        self.last_time = event.time;
        if let Time::At(t) = event.time {
            self.last_real = t;
        }
        self.queue.push_back(event);
        if was_empty {
            self.receiver_time = self.last_time;
        }
    }

    /// Removes the oldest event.
    pub(crate) fn take(&mut self) -> KernelResult<Event<T>> {
        let event = self.queue.pop_front().ok_or_else(|| KernelError::EmptyChannel {
            channel: self.name.clone(),
        })?;
        self.receiver_time = self.queue.front().map_or(self.last_time, |e| e.time);
        Ok(event)
    }

    /// Drops the head event if it is stamped `IGNORE`. An emptied channel
    /// falls back to its last real time so it rejoins time ordering.
    pub(crate) fn discard_ignored_head(&mut self) -> bool {
        if self.receiver_time != Time::Ignore {
            return false;
        }
        self.queue.pop_front();
        match self.queue.front() {
            Some(head) => self.receiver_time = head.time,
            None => {
                if self.last_time == Time::Ignore {
                    self.last_time = Time::At(self.last_real);
                }
                self.receiver_time = self.last_time;
            }
        }
        self.ignore_seen = false;
        true
    }

    pub(crate) fn info(&self, id: ChannelId) -> ChannelInfo {
        ChannelInfo {
            id,
            name: self.name.clone(),
            source: self.source,
            sink: self.sink,
            len: self.queue.len(),
            capacity: self.capacity,
            priority: self.priority,
            receiver_time: self.receiver_time,
            last_time: self.last_time,
            completion_time: self.completion_time,
            flags: self.flags,
            terminated: self.terminated,
            read_pending: self.read_pending,
            write_pending: self.write_pending,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Blocking protocol
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one locked readiness evaluation.
enum Readiness {
    Ready,
    NotReady,
    /// A hidden null token was consumed; propagate time and ask again.
    AdvancedPastNull,
}

impl<T> Coordinator<T> {
    pub(crate) fn put_event(&self, id: ChannelId, payload: Payload<T>, time: Time) -> KernelResult<()> {
        let mut state = self.lock()?;
        loop {
            let channel = state.channel(id);
            if channel.is_terminated() {
                if state.unregister_write_blocked(id) {
                    self.notify();
                }
                return Err(KernelError::Terminated);
            }
            if channel.is_closed() {
                trace!("{}: closed, dropping event at {}", channel.name(), time);
                return Ok(());
            }
            let time = channel.admit_time(time)?;
            if channel.has_room() {
                let payload = if time == Time::Inactive { Payload::Advance } else { payload };
                state.channel_mut(id).accept(Event::new(payload, time));
                if state.unregister_read_blocked(id) {
                    self.notify();
                }
                return Ok(());
            }
            if !channel.write_pending {
                state.register_write_blocked(id);
                self.notify();
            }
            state = self.wait(state)?;
        }
    }

    pub(crate) fn take_event(
        &self,
        id: ChannelId,
        mut keeper: Option<&mut ClockKeeper>,
    ) -> KernelResult<Event<T>> {
        let event = {
            let mut state = self.lock()?;
            if state.channel(id).is_terminated() {
                return Err(KernelError::Terminated);
            }
            let event = state.channel_mut(id).take()?;
            if state.unregister_write_blocked(id) {
                self.notify();
            }
            if let Some(keeper) = keeper.as_mut() {
                keeper.consume(&event, &state)?;
            }
            event
        };
        if let Some(keeper) = keeper {
            keeper.send_out_null_tokens(self, Some(id))?;
        }
        Ok(event)
    }

    pub(crate) fn has_token(&self, id: ChannelId, keeper: Option<&mut ClockKeeper>) -> KernelResult<bool> {
        let Some(keeper) = keeper else {
            return Ok(false);
        };
        loop {
            match self.poll_readiness(id, keeper)? {
                Readiness::Ready => return Ok(true),
                Readiness::NotReady => return Ok(false),
                Readiness::AdvancedPastNull => keeper.send_out_null_tokens(self, Some(id))?,
            }
        }
    }

    fn poll_readiness(&self, id: ChannelId, keeper: &mut ClockKeeper) -> KernelResult<Readiness> {
        let hide_nulls = self.config().hide_null_tokens;
        let mut state = self.lock()?;
        loop {
            if state.channel(id).is_terminated() {
                if state.unregister_read_blocked(id) {
                    self.notify();
                }
                return Err(KernelError::Terminated);
            }
            keeper.resort(&state);
            let next = keeper.next_time();
            let channel = state.channel(id);
            let receiver_time = channel.receiver_time();

            match receiver_time {
                Time::Inactive => return Ok(Readiness::NotReady),
                Time::Ignore => {
                    if channel.ignore_seen {
                        state.channel_mut(id).ignore_seen = false;
                        if keeper.remove_all_ignore_tokens(&mut state) {
                            self.notify();
                        }
                    } else {
                        state.channel_mut(id).ignore_seen = true;
                        keeper.note_ignored();
                    }
                    return Ok(Readiness::NotReady);
                }
                Time::At(_) => {}
            }
            if receiver_time > next {
                return Ok(Readiness::NotReady);
            }

            if !channel.is_empty() {
                let head_is_null = channel.head_is_advance();
                if !keeper.has_min_receiver_time() {
                    let real = keeper.highest_priority_real(&state);
                    let eligible = if head_is_null {
                        real.is_none() && keeper.highest_priority_null(&state) == Some(id)
                    } else {
                        real == Some(id)
                    };
                    if !eligible {
                        return Ok(Readiness::NotReady);
                    }
                }
                if head_is_null && hide_nulls {
                    let event = state.channel_mut(id).take()?;
                    if state.unregister_write_blocked(id) {
                        self.notify();
                    }
                    keeper.consume(&event, &state)?;
                    return Ok(Readiness::AdvancedPastNull);
                }
                return Ok(Readiness::Ready);
            }

            if !channel.read_pending {
                state.register_read_blocked(id);
                self.notify();
            }
            state = self.wait(state)?;
        }
    }

    pub(crate) fn request_finish(&self, id: ChannelId) -> KernelResult<()> {
        let mut state = self.lock()?;
        state.terminate_channel(id);
        self.notify();
        Ok(())
    }

    pub(crate) fn drain(&self, id: ChannelId) -> KernelResult<Vec<Event<T>>> {
        let mut state = self.lock()?;
        let mut events = Vec::with_capacity(state.channel(id).len());
        while !state.channel(id).is_empty() {
            events.push(state.channel_mut(id).take()?);
        }
        if state.unregister_write_blocked(id) {
            self.notify();
        }
        Ok(events)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public handle
// ────────────────────────────────────────────────────────────────────────────

/// A handle to one channel. Cheap to clone; all clones refer to the same
/// queue.
pub struct Channel<T> {
    id: ChannelId,
    coordinator: Arc<Coordinator<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            id: self.id,
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T> Channel<T> {
    pub(crate) fn new(id: ChannelId, coordinator: Arc<Coordinator<T>>) -> Self {
        Channel { id, coordinator }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    /// Appends an event, blocking while the channel is full.
    ///
    /// # Errors
    /// - `Terminated` if the channel finishes before the event is accepted.
    /// - `TimeRegression` / `NegativeTime` for invalid timestamps.
    pub fn put(&self, payload: Payload<T>, time: Time) -> KernelResult<()> {
        self.coordinator.put_event(self.id, payload, time)
    }

    /// Appends a real token.
    pub fn put_token(&self, token: T, time: Time) -> KernelResult<()> {
        self.put(Payload::Real(token), time)
    }

    /// Removes the oldest event. With a clock keeper, the keeper's time
    /// advances to the event and null tokens flow downstream.
    ///
    /// # Errors
    /// `EmptyChannel` if there is nothing to take; `Terminated` after finish.
    pub fn get(&self, keeper: Option<&mut ClockKeeper>) -> KernelResult<Event<T>> {
        self.coordinator.take_event(self.id, keeper)
    }

    /// Blocking read-readiness query on behalf of `keeper`'s actor.
    ///
    /// Returns `Ok(false)` immediately without a keeper.
    pub fn has_token(&self, keeper: Option<&mut ClockKeeper>) -> KernelResult<bool> {
        self.coordinator.has_token(self.id, keeper)
    }

    /// Returns `true` if a put would not block right now.
    pub fn has_room(&self) -> KernelResult<bool> {
        let state = self.coordinator.lock()?;
        let channel = state.channel(self.id);
        Ok(!channel.is_terminated() && channel.has_room())
    }

    pub fn capacity(&self) -> KernelResult<usize> {
        Ok(self.coordinator.lock()?.channel(self.id).capacity())
    }

    pub fn set_capacity(&self, capacity: usize) -> KernelResult<()> {
        let mut state = self.coordinator.lock()?;
        debug!("{}: capacity set to {}", state.channel(self.id).name(), capacity);
        state.channel_mut(self.id).set_capacity(capacity);
        self.coordinator.notify();
        Ok(())
    }

    /// Terminates the channel and wakes anyone blocked on it.
    pub fn request_finish(&self) -> KernelResult<()> {
        self.coordinator.request_finish(self.id)
    }

    /// Takes every queued event without blocking.
    pub fn drain(&self) -> KernelResult<Vec<Event<T>>> {
        self.coordinator.drain(self.id)
    }

    /// Takes every queued real token without blocking, dropping null and
    /// sentinel events.
    pub fn drain_tokens(&self) -> KernelResult<Vec<(T, Time)>> {
        Ok(self
            .drain()?
            .into_iter()
            .filter_map(|e| match (e.payload, e.time) {
                (Payload::Real(token), Time::At(t)) => Some((token, Time::At(t))),
                _ => None,
            })
            .collect())
    }

    pub fn info(&self) -> KernelResult<ChannelInfo> {
        self.coordinator.channel_info(self.id)
    }
}

/// Writes into a `FROM_ENVIRONMENT` channel from outside the model.
///
/// While any feed is open, a stall whose readers wait on environment
/// channels is not treated as a deadlock. Closing (or dropping) the feed
/// delivers `INACTIVE` and releases that guard.
pub struct ExternalFeed<T> {
    channel: Channel<T>,
    open: bool,
}

impl<T> ExternalFeed<T> {
    pub(crate) fn new(channel: Channel<T>) -> Self {
        ExternalFeed {
            channel,
            open: true,
        }
    }

    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    pub fn send(&self, token: T, time: Time) -> KernelResult<()> {
        self.channel.put_token(token, time)
    }

    /// Sends a placeholder that is sequenced but ignored for time advancement.
    pub fn send_ignore(&self, token: T) -> KernelResult<()> {
        self.channel.put_token(token, Time::Ignore)
    }

    pub fn send_null(&self, time: Time) -> KernelResult<()> {
        self.channel.put(Payload::Advance, time)
    }

    /// Delivers `INACTIVE` and marks the feed closed.
    pub fn close(mut self) -> KernelResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> KernelResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let sent = self.channel.put(Payload::Advance, Time::Inactive);
        self.channel.coordinator.feed_closed()?;
        match sent {
            Err(e) if e.is_termination() => Ok(()),
            other => other,
        }
    }
}

impl<T> Drop for ExternalFeed<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("{}: closing feed failed: {}", self.channel.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use std::thread;
    use std::time::Duration;

    fn wired(capacity: usize) -> (Arc<Coordinator<u32>>, Channel<u32>) {
        let config = KernelConfig {
            initial_capacity: capacity,
            ..KernelConfig::default()
        };
        let coordinator = Coordinator::new(config);
        let a = coordinator.register_actor("a").unwrap();
        let b = coordinator.register_actor("b").unwrap();
        let channel = coordinator.new_channel(a, b).unwrap();
        (coordinator, channel)
    }

    fn state(capacity: usize) -> ChannelState<u32> {
        ChannelState::new("a->b#0".into(), None, None, capacity, 0, ChannelFlags::empty())
    }

    fn push(ch: &mut ChannelState<u32>, token: u32, time: Time) -> KernelResult<()> {
        let time = ch.admit_time(time)?;
        ch.accept(Event::real(token, time));
        Ok(())
    }

    #[test_log::test]
    fn events_come_out_in_put_order() {
        let mut ch = state(8);
        for (i, t) in [1.0, 1.0, 2.0, 3.5].into_iter().enumerate() {
            push(&mut ch, i as u32, Time::At(t)).unwrap();
        }
        let tokens: Vec<u32> = (0..4)
            .map(|_| ch.take().unwrap().payload.into_token().unwrap())
            .collect();
        assert_eq!(tokens, vec![0, 1, 2, 3]);
    }

    #[test_log::test]
    fn earlier_real_time_is_rejected() {
        let mut ch = state(8);
        push(&mut ch, 0, Time::At(5.0)).unwrap();
        let err = push(&mut ch, 1, Time::At(4.0)).unwrap_err();
        assert!(matches!(err, KernelError::TimeRegression { time, last, .. } if time == 4.0 && last == 5.0));
        push(&mut ch, 2, Time::At(5.0)).unwrap();
    }

    #[test_log::test]
    fn sentinels_bypass_the_monotonicity_check() {
        let mut ch = state(8);
        push(&mut ch, 0, Time::At(5.0)).unwrap();
        push(&mut ch, 1, Time::Ignore).unwrap();
        push(&mut ch, 2, Time::At(6.0)).unwrap();
        push(&mut ch, 3, Time::Inactive).unwrap();
        assert!(ch.is_closed());
    }

    #[test_log::test]
    fn negative_time_is_rejected() {
        let ch = state(8);
        assert!(matches!(
            ch.admit_time(Time::At(-0.5)),
            Err(KernelError::NegativeTime { .. })
        ));
    }

    #[test_log::test]
    fn receiver_time_tracks_head_then_last_time() {
        let mut ch = state(8);
        assert_eq!(ch.receiver_time(), Time::ZERO);
        push(&mut ch, 0, Time::At(2.0)).unwrap();
        assert_eq!(ch.receiver_time(), Time::At(2.0));
        push(&mut ch, 1, Time::At(7.0)).unwrap();
        assert_eq!(ch.receiver_time(), Time::At(2.0));
        ch.take().unwrap();
        assert_eq!(ch.receiver_time(), Time::At(7.0));
        ch.take().unwrap();
        assert_eq!(ch.receiver_time(), ch.last_time());
        assert_eq!(ch.receiver_time(), Time::At(7.0));
    }

    #[test_log::test]
    fn take_on_empty_is_an_error() {
        let mut ch = state(1);
        assert!(matches!(ch.take(), Err(KernelError::EmptyChannel { .. })));
    }

    #[test_log::test]
    fn tokens_past_completion_become_inactive() {
        let mut ch = state(8);
        ch.set_completion_time(CompletionTime::At(10.0));
        assert_eq!(ch.admit_time(Time::At(10.0)).unwrap(), Time::At(10.0));
        assert_eq!(ch.admit_time(Time::At(10.5)).unwrap(), Time::Inactive);
        ch.set_completion_time(CompletionTime::Eternity);
        assert_eq!(ch.admit_time(Time::At(1.0e9)).unwrap(), Time::At(1.0e9));
    }

    #[test_log::test]
    fn room_respects_capacity_except_on_boundaries() {
        let mut ch = state(1);
        assert!(ch.has_room());
        push(&mut ch, 0, Time::At(1.0)).unwrap();
        assert!(!ch.has_room());

        let mut tap: ChannelState<u32> = ChannelState::new(
            "a->env".into(),
            None,
            None,
            1,
            0,
            ChannelFlags::TO_ENVIRONMENT,
        );
        push(&mut tap, 0, Time::At(1.0)).unwrap();
        assert!(tap.has_room());
    }

    #[test_log::test]
    fn discarding_last_ignore_event_restores_real_time() {
        let mut ch = state(4);
        push(&mut ch, 0, Time::At(3.0)).unwrap();
        ch.take().unwrap();
        push(&mut ch, 1, Time::Ignore).unwrap();
        assert_eq!(ch.receiver_time(), Time::Ignore);
        assert!(ch.discard_ignored_head());
        assert!(ch.is_empty());
        assert_eq!(ch.receiver_time(), Time::At(3.0));
        assert!(!ch.discard_ignored_head());
    }

    #[test_log::test]
    fn has_token_without_a_keeper_is_false() {
        let (_coordinator, ch) = wired(1);
        ch.put_token(1, Time::At(1.0)).unwrap();
        assert!(!ch.has_token(None).unwrap());
    }

    #[test_log::test]
    fn has_token_with_the_only_input_is_true() {
        let (coordinator, ch) = wired(1);
        let mut keeper = ClockKeeper::new("b");
        keeper.add_input(ch.id(), &*coordinator.lock().unwrap());
        ch.put_token(4, Time::At(2.0)).unwrap();
        assert!(ch.has_token(Some(&mut keeper)).unwrap());
        assert_eq!(ch.get(Some(&mut keeper)).unwrap(), Event::real(4, Time::At(2.0)));
        assert_eq!(keeper.current_time(), Time::At(2.0));
    }

    #[test_log::test]
    fn has_room_and_set_capacity() {
        let (_coordinator, ch) = wired(1);
        assert!(ch.has_room().unwrap());
        ch.put_token(1, Time::At(1.0)).unwrap();
        assert!(!ch.has_room().unwrap());

        ch.set_capacity(3).unwrap();
        assert_eq!(ch.capacity().unwrap(), 3);
        assert!(ch.has_room().unwrap());

        ch.request_finish().unwrap();
        assert!(!ch.has_room().unwrap());
    }

    #[test_log::test]
    fn request_finish_wakes_a_blocked_writer() {
        let (_coordinator, ch) = wired(1);
        ch.put_token(1, Time::At(1.0)).unwrap();

        let writer = {
            let ch = ch.clone();
            thread::spawn(move || ch.put_token(2, Time::At(2.0)))
        };
        while !ch.info().unwrap().write_pending {
            thread::sleep(Duration::from_millis(1));
        }

        ch.request_finish().unwrap();
        assert_eq!(writer.join().unwrap(), Err(KernelError::Terminated));
        let info = ch.info().unwrap();
        assert!(info.terminated);
        assert!(!info.write_pending);
        assert_eq!(info.len, 1);
    }

    #[test_log::test]
    fn token_past_completion_is_stored_as_null() {
        let (coordinator, ch) = wired(4);
        coordinator.set_completion_time(CompletionTime::At(2.0)).unwrap();
        ch.put_token(1, Time::At(1.0)).unwrap();
        ch.put_token(2, Time::At(3.0)).unwrap();
        ch.put_token(3, Time::At(4.0)).unwrap();

        assert_eq!(
            ch.drain().unwrap(),
            vec![Event::real(1, Time::At(1.0)), Event::advance(Time::Inactive)]
        );
    }
}
