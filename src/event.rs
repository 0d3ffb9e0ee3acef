//! Events carried by channels.

use crate::time::Time;

/// What an event carries.
///
/// `Advance` events only move the receiver's clock forward; they let
/// downstream actors make progress through an actor that has nothing to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<T> {
    /// An application token. The kernel never looks inside.
    Real(T),
    /// A null token: advance time, carry no data.
    Advance,
}

impl<T> Payload<T> {
    #[inline]
    #[must_use]
    pub fn is_advance(&self) -> bool {
        matches!(self, Payload::Advance)
    }

    /// Returns the token, if any.
    pub fn into_token(self) -> Option<T> {
        match self {
            Payload::Real(token) => Some(token),
            Payload::Advance => None,
        }
    }
}

/// A timestamped payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub payload: Payload<T>,
    pub time: Time,
}

impl<T> Event<T> {
    pub fn new(payload: Payload<T>, time: Time) -> Self {
        Event { payload, time }
    }

    /// A real token at `time`.
    pub fn real(token: T, time: Time) -> Self {
        Event::new(Payload::Real(token), time)
    }

    /// A null token at `time`.
    pub fn advance(time: Time) -> Self {
        Event::new(Payload::Advance, time)
    }
}

impl<T: std::fmt::Debug> std::fmt::Display for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Payload::Real(token) => write!(f, "{:?}@{}", token, self.time),
            Payload::Advance => write!(f, "null@{}", self.time),
        }
    }
}
