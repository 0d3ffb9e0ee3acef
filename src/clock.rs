//! Per-actor logical clock.
//!
//! A [`ClockKeeper`] tracks one actor's current time, its output time, and a
//! sorted view of its input channels. The sort order decides which channel
//! the actor may read next:
//!
//! ```text
//!   (receiver time ascending, priority descending)
//!
//!   C2 t=3.0 p=1   ← next; lowest time
//!   C0 t=5.0 p=2   ┐ tie at t=5.0: higher priority first
//!   C1 t=5.0 p=0   ┘
//!   C3 IGNORE
//!   C4 INACTIVE
//! ```
//!
//! The keeper stores only channel ids, times, and priorities. Channel
//! contents are read through the coordinator's [`ModelState`] while the
//! caller holds the lock.

use log::{debug, trace};

use crate::channel::ChannelId;
use crate::coordinator::{Coordinator, ModelState};
use crate::error::{KernelError, KernelResult};
use crate::event::{Event, Payload};
use crate::time::Time;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReceiverEntry {
    channel: ChannelId,
    time: Time,
    priority: u32,
}

/// Logical clock and input ordering for one actor.
#[derive(Debug, Clone)]
pub struct ClockKeeper {
    actor: String,
    current_time: Time,
    output_time: Time,
    entries: Vec<ReceiverEntry>,
    outputs: Vec<ChannelId>,
    /// An `IGNORE` head has been seen since the last cleanup.
    ignored: bool,
    /// A token has been consumed since the last cleanup.
    consumed: bool,
}

impl ClockKeeper {
    pub fn new(actor: impl Into<String>) -> Self {
        ClockKeeper {
            actor: actor.into(),
            current_time: Time::ZERO,
            output_time: Time::ZERO,
            entries: Vec::new(),
            outputs: Vec::new(),
            ignored: false,
            consumed: false,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    /// Moves the clock forward. `IGNORE` leaves it unchanged; `INACTIVE`
    /// is the final transition.
    ///
    /// # Errors
    /// `CurrentTimeRegression` if `time` is earlier than the current time.
    pub fn set_current_time(&mut self, time: Time) -> KernelResult<()> {
        let t = match time {
            Time::At(t) => t,
            Time::Ignore => return Ok(()),
            Time::Inactive => {
                self.current_time = Time::Inactive;
                return Ok(());
            }
        };
        if time.is_invalid() {
            return Err(KernelError::NegativeTime {
                context: self.actor.clone(),
                time: t,
            });
        }
        if time < self.current_time {
            return Err(KernelError::CurrentTimeRegression {
                actor: self.actor.clone(),
                time: t,
                current: self.current_time.value().unwrap_or(f64::INFINITY),
            });
        }
        self.current_time = time;
        Ok(())
    }

    /// The time stamped on outgoing tokens. Never earlier than the current
    /// time; reading it raises it if the clock has moved past.
    pub fn output_time(&mut self) -> Time {
        if self.output_time < self.current_time {
            self.output_time = self.current_time;
        }
        self.output_time
    }

    /// Raises the output time for a delayed emission. Never lowers it and
    /// never sets it below the current time; `IGNORE` is a no-op.
    pub fn set_output_time(&mut self, time: Time) -> KernelResult<()> {
        if time.is_invalid() {
            return Err(KernelError::NegativeTime {
                context: self.actor.clone(),
                time: time.value().unwrap_or(f64::NAN),
            });
        }
        if time != Time::Ignore {
            self.output_time = self.output_time.max(time).max(self.current_time);
        }
        Ok(())
    }

    pub fn add_output(&mut self, channel: ChannelId) {
        self.outputs.push(channel);
    }

    pub fn outputs(&self) -> &[ChannelId] {
        &self.outputs
    }

    /// Input channels in current read order.
    pub fn channel_order(&self) -> Vec<ChannelId> {
        self.entries.iter().map(|e| e.channel).collect()
    }

    /// Receiver time of the first channel in order. An actor without inputs
    /// reports its own clock.
    pub fn next_time(&self) -> Time {
        self.entries.first().map_or(self.current_time, |e| e.time)
    }

    /// `true` if the first channel's time is strictly lower than the second's.
    pub fn has_min_receiver_time(&self) -> bool {
        match self.entries.as_slice() {
            [first, second, ..] => first.time != second.time,
            _ => true,
        }
    }

    /// Registers an input channel if absent and re-sorts.
    pub(crate) fn add_input<T>(&mut self, channel: ChannelId, state: &ModelState<T>) {
        if !self.entries.iter().any(|e| e.channel == channel) {
            let ch = state.channel(channel);
            self.entries.push(ReceiverEntry {
                channel,
                time: ch.receiver_time(),
                priority: ch.priority(),
            });
        }
        self.resort(state);
    }

    /// Refreshes every receiver time from the channels and re-sorts.
    pub(crate) fn resort<T>(&mut self, state: &ModelState<T>) {
        for entry in &mut self.entries {
            entry.time = state.channel(entry.channel).receiver_time();
            if entry.time == Time::Ignore {
                self.ignored = true;
            }
        }
        self.entries
            .sort_by(|a, b| a.time.cmp(&b.time).then(b.priority.cmp(&a.priority)));
    }

    fn tied_at_front(&self) -> impl Iterator<Item = &ReceiverEntry> {
        let front = self.entries.first().map(|e| e.time);
        self.entries
            .iter()
            .take_while(move |e| Some(e.time) == front && e.time.value().is_some())
    }

    /// Highest-priority channel tied at the minimum time whose head is not a
    /// null token. An empty channel counts: a real token may still arrive.
    pub(crate) fn highest_priority_real<T>(&self, state: &ModelState<T>) -> Option<ChannelId> {
        self.tied_at_front()
            .find(|e| !state.channel(e.channel).head_is_advance())
            .map(|e| e.channel)
    }

    /// Highest-priority channel tied at the minimum time whose head is a
    /// null token.
    pub(crate) fn highest_priority_null<T>(&self, state: &ModelState<T>) -> Option<ChannelId> {
        self.tied_at_front()
            .find(|e| state.channel(e.channel).head_is_advance())
            .map(|e| e.channel)
    }

    pub(crate) fn note_ignored(&mut self) {
        self.ignored = true;
    }

    /// Advances the clock to a just-consumed event and re-sorts.
    pub(crate) fn consume<T>(&mut self, event: &Event<T>, state: &ModelState<T>) -> KernelResult<()> {
        self.set_current_time(event.time)?;
        self.consumed = true;
        self.resort(state);
        Ok(())
    }

    /// Discards the `IGNORE` head of every input channel. Returns `true` if
    /// a blocked writer was released.
    pub(crate) fn remove_all_ignore_tokens<T>(&mut self, state: &mut ModelState<T>) -> bool {
        let mut released = false;
        for entry in &self.entries {
            if state.channel_mut(entry.channel).discard_ignored_head() {
                trace!("{}: discarded IGNORE head of {}", self.actor, entry.channel);
                released |= state.unregister_write_blocked(entry.channel);
            }
        }
        self.ignored = false;
        self.consumed = false;
        self.resort(state);
        released
    }

    /// Start-of-pass cleanup: once an `IGNORE` head has been seen and the
    /// actor has since consumed a token, the placeholders are dropped.
    pub(crate) fn cleanup_ignored<T>(&mut self, coordinator: &Coordinator<T>) -> KernelResult<()> {
        if !(self.ignored && self.consumed) {
            return Ok(());
        }
        let mut state = coordinator.lock()?;
        if self.remove_all_ignore_tokens(&mut state) {
            coordinator.notify();
        }
        Ok(())
    }

    /// Sends a null token at the current time on every output whose last
    /// timestamp is older than the current time.
    pub(crate) fn send_out_null_tokens<T>(
        &mut self,
        coordinator: &Coordinator<T>,
        trigger: Option<ChannelId>,
    ) -> KernelResult<()> {
        let time = self.current_time;
        if time.is_sentinel() {
            return Ok(());
        }
        for &id in &self.outputs {
            let stale = {
                let state = coordinator.lock()?;
                let ch = state.channel(id);
                !ch.is_terminated() && !ch.is_closed() && ch.last_time() < time
            };
            if !stale {
                continue;
            }
            match trigger {
                Some(from) => trace!("{}: null {} on {} after {}", self.actor, time, id, from),
                None => trace!("{}: null {} on {}", self.actor, time, id),
            }
            match coordinator.put_event(id, Payload::Advance, time) {
                Err(e) if e.is_termination() => debug!("{}: {} finished during null send", self.actor, id),
                other => other?,
            }
        }
        Ok(())
    }

    /// Runs one input pass: finds the next readable channel in time order
    /// and takes its head.
    ///
    /// Blocks until some input is readable. Returns `None` once every input
    /// is `INACTIVE`.
    pub(crate) fn next_input<T>(
        &mut self,
        coordinator: &Coordinator<T>,
    ) -> KernelResult<Option<(ChannelId, Event<T>)>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        loop {
            self.cleanup_ignored(coordinator)?;
            let order = {
                let state = coordinator.lock()?;
                self.resort(&state);
                self.channel_order()
            };
            if self.next_time() == Time::Inactive {
                return Ok(None);
            }
            for id in order {
                if coordinator.has_token(id, Some(&mut *self))? {
                    let event = coordinator.take_event(id, Some(&mut *self))?;
                    return Ok(Some((id, event)));
                }
            }
        }
    }
}
