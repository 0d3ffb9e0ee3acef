//! Run and task lifecycle types.
//!
//! - [`RunPhase`] is the coordinator's state machine.
//! - [`RunOutcome`] says how a run that did not fail came to an end.
//! - [`TaskExit`] says why one actor thread stopped iterating.

use serde::Serialize;

/// The coordinator's phase.
///
/// # Phase transitions
///
/// ```text
/// Idle ──► Running ──► StallDetected ──► Running        (capacity escalated)
///                 │                 └──► Terminated     (real deadlock)
///                 └──────────────────────► Terminated   (completed, stopped, failed)
/// ```
///
/// Topology may only change while `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    StallDetected,
    Terminated,
}

impl RunPhase {
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, RunPhase::Idle)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::Running => write!(f, "Running"),
            RunPhase::StallDetected => write!(f, "StallDetected"),
            RunPhase::Terminated => write!(f, "Terminated"),
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Every actor task finished on its own.
    Completed,
    /// Every active actor was blocked with no write blocks to relieve.
    RealDeadlock,
    /// `request_stop` was called.
    Stopped,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "Completed"),
            RunOutcome::RealDeadlock => write!(f, "RealDeadlock"),
            RunOutcome::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Why an actor task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// All inputs went `INACTIVE`, or `postfire` declined another iteration.
    Finished,
    /// A blocking call unwound with the termination signal, or a stop was
    /// requested.
    Terminated,
    /// The actor or the kernel reported a fatal error.
    Failed(String),
}

impl TaskExit {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskExit::Failed(_))
    }
}

impl std::fmt::Display for TaskExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskExit::Finished => write!(f, "Finished"),
            TaskExit::Terminated => write!(f, "Terminated"),
            TaskExit::Failed(msg) => write!(f, "Failed({msg})"),
        }
    }
}
