//! Logical timestamps.
//!
//! Every event that travels through a channel carries a [`Time`]. Real
//! timestamps are non-negative reals; two sentinels ride along in the same
//! type so they can be queued in sequence with real events:
//!
//! - [`Time::Ignore`]: keep the event in order, but do not let it drive
//!   time advancement yet.
//! - [`Time::Inactive`]: the channel has permanently terminated.
//!
//! Completion times live in a separate type, [`CompletionTime`], so that the
//! "run forever" and "not started" sentinels can never be enqueued.
//!
//! # Ordering
//!
//! `Time` is totally ordered the way the clock keeper sorts channels:
//!
//! ```text
//! At(0.0) < At(1.5) < ... < Ignore < Inactive
//! ```
//!
//! `Ignore == Ignore` and `Inactive == Inactive`; real values compare with
//! `f64::total_cmp`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A timestamp attached to an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Time {
    /// A real, non-negative logical time.
    At(f64),
    /// Sequenced, but invisible to time advancement.
    Ignore,
    /// The channel carrying this event has terminated.
    Inactive,
}

impl Time {
    /// The start of logical time.
    pub const ZERO: Time = Time::At(0.0);

    /// Returns the real value, or `None` for sentinels.
    #[inline]
    #[must_use]
    pub fn value(self) -> Option<f64> {
        match self {
            Time::At(t) => Some(t),
            Time::Ignore | Time::Inactive => None,
        }
    }

    /// Returns `true` for `Ignore` and `Inactive`.
    #[inline]
    #[must_use]
    pub fn is_sentinel(self) -> bool {
        !matches!(self, Time::At(_))
    }

    /// Returns `true` for a real time that is negative or not a number.
    #[inline]
    #[must_use]
    pub fn is_invalid(self) -> bool {
        match self {
            Time::At(t) => t.is_nan() || t < 0.0,
            Time::Ignore | Time::Inactive => false,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Time::At(_) => 0,
            Time::Ignore => 1,
            Time::Inactive => 2,
        }
    }
}

impl Default for Time {
    fn default() -> Self {
        Time::ZERO
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Time::At(a), Time::At(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Time {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Time {}

impl From<f64> for Time {
    fn from(t: f64) -> Self {
        Time::At(t)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Time::At(t) => write!(f, "t={t}"),
            Time::Ignore => write!(f, "IGNORE"),
            Time::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// The time after which a channel stops delivering real tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CompletionTime {
    /// Set before any run began. Behaves like `Eternity`.
    #[default]
    NotStarted,
    /// Run forever.
    Eternity,
    /// Tokens stamped later than this are converted to `Time::Inactive`.
    At(f64),
}

impl CompletionTime {
    /// Returns `true` if an event stamped `time` falls past this completion time.
    #[must_use]
    pub fn is_exceeded_by(self, time: Time) -> bool {
        match (self, time) {
            (CompletionTime::At(limit), Time::At(t)) => t > limit,
            _ => false,
        }
    }
}

impl From<Option<f64>> for CompletionTime {
    fn from(limit: Option<f64>) -> Self {
        limit.map_or(CompletionTime::Eternity, CompletionTime::At)
    }
}

impl std::fmt::Display for CompletionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionTime::NotStarted => write!(f, "NOT_STARTED"),
            CompletionTime::Eternity => write!(f, "ETERNITY"),
            CompletionTime::At(t) => write!(f, "t={t}"),
        }
    }
}
