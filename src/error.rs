//! Error types for the DDE kernel.
//!
//! Only invariant violations are real failures. Backpressure blocks instead
//! of erroring, and real deadlock is a normal end of run. The one
//! non-failure variant is [`KernelError::Terminated`]: the signal a blocked
//! call unwinds with once its channel has been asked to finish.

/// Error returned by kernel operations.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// The channel was asked to finish while the caller was using it.
    /// Control flow, not a failure.
    Terminated,

    /// A put carried a timestamp older than the last one accepted.
    TimeRegression {
        channel: String,
        time: f64,
        last: f64,
    },

    /// A real timestamp was negative or not a number.
    NegativeTime { context: String, time: f64 },

    /// An actor tried to move its current time backwards.
    CurrentTimeRegression {
        actor: String,
        time: f64,
        current: f64,
    },

    /// `get` was called on an empty channel.
    EmptyChannel { channel: String },

    /// Deadlock recovery would grow a channel past the configured maximum.
    CapacityExceeded {
        channel: String,
        requested: usize,
        maximum: usize,
    },

    /// Topology was changed while a run was in progress.
    TopologyFrozen,

    /// An actor's own fire/postfire logic failed.
    ActorFailed { actor: String, reason: String },

    /// A thread panicked while holding the coordinator lock.
    Poisoned,
}

impl KernelError {
    /// Returns `true` for the termination signal.
    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(self, KernelError::Terminated)
    }

    /// Convenience constructor for actor code.
    pub fn actor_failed(actor: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        KernelError::ActorFailed {
            actor: actor.into(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::Terminated => write!(f, "channel terminated"),
            KernelError::TimeRegression {
                channel,
                time,
                last,
            } => write!(
                f,
                "{channel}: put at t={time} is earlier than last accepted t={last}"
            ),
            KernelError::NegativeTime { context, time } => {
                write!(f, "{context}: invalid time {time}")
            }
            KernelError::CurrentTimeRegression {
                actor,
                time,
                current,
            } => write!(
                f,
                "{actor}: attempt to set current time to t={time}, already at t={current}"
            ),
            KernelError::EmptyChannel { channel } => write!(f, "{channel}: get on empty channel"),
            KernelError::CapacityExceeded {
                channel,
                requested,
                maximum,
            } => write!(
                f,
                "{channel}: queue size {requested} exceeds the maximum capacity {maximum}. \
                 Perhaps you have an unbounded queue?"
            ),
            KernelError::TopologyFrozen => write!(f, "topology cannot change during a run"),
            KernelError::ActorFailed { actor, reason } => write!(f, "{actor}: {reason}"),
            KernelError::Poisoned => write!(f, "coordinator lock poisoned"),
        }
    }
}

impl std::error::Error for KernelError {}

impl<G> From<std::sync::PoisonError<G>> for KernelError {
    fn from(_: std::sync::PoisonError<G>) -> Self {
        KernelError::Poisoned
    }
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_is_not_a_failure() {
        assert!(KernelError::Terminated.is_termination());
        assert!(!KernelError::Poisoned.is_termination());
    }

    #[test]
    fn regression_names_the_channel() {
        let e = KernelError::TimeRegression {
            channel: "ramp->scale#0".into(),
            time: 1.0,
            last: 2.0,
        };
        let s = e.to_string();
        assert!(s.contains("ramp->scale#0"));
        assert!(s.contains("t=1"));
        assert!(s.contains("t=2"));
    }

    #[test]
    fn capacity_message_hints_at_unbounded_queue() {
        let e = KernelError::CapacityExceeded {
            channel: "a->b#0".into(),
            requested: 8,
            maximum: 4,
        };
        assert!(e.to_string().contains("unbounded queue"));
    }

    #[test]
    fn is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(KernelError::TopologyFrozen);
        assert!(!e.to_string().is_empty());
    }
}
