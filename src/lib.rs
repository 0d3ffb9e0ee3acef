//! # dde-kernel
//!
//! Time synchronization and deadlock resolution for distributed
//! discrete-event models. Each actor runs on its own thread with a private
//! logical clock; actors talk only through bounded, timestamped FIFO
//! channels.
//!
//! ## Architecture
//!
//! ```text
//!        host thread                         actor threads
//!   ┌─────────────────────┐       ┌──────────────────────────────────┐
//!   │ Model::run          │       │ ActorTask                        │
//!   │  └─ Coordinator::   │       │  ├─ ClockKeeper  (time, order)   │
//!   │     run_until_      │       │  ├─ Actor::fire / postfire       │
//!   │     deadlock_or_stop│       │  └─ Channel::put / get / has_... │
//!   └──────────┬──────────┘       └────────────────┬─────────────────┘
//!              │      one Mutex<ModelState> + one Condvar     │
//!              └──────────────────────┬───────────────────────┘
//!                                     ▼
//!      channels · read/write-blocked counters · write-blocked set
//! ```
//!
//! - An actor reads next from the input channel with the lowest receiver
//!   time, ties broken by connection priority.
//! - Writers block on full channels; readers block on empty ones.
//! - When every active actor is blocked, the coordinator either grows the
//!   smallest write-blocked queue (artificial deadlock) or ends the run
//!   (real deadlock).
//! - Null (`Advance`) events carry time forward through actors that have
//!   nothing to send. `IGNORE` and `INACTIVE` sentinels travel in-band.

pub mod channel;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod model;
pub mod task;
pub mod time;

pub use channel::{Channel, ChannelFlags, ChannelId, ChannelInfo, ExternalFeed};
pub use clock::ClockKeeper;
pub use config::{KernelConfig, CONFIG};
pub use coordinator::{Coordinator, RunReport, RunStats};
pub use error::{KernelError, KernelResult};
pub use event::{Event, Payload};
pub use lifecycle::{RunOutcome, RunPhase, TaskExit};
pub use model::Model;
pub use task::{Actor, ActorId, ActorTask, FiringContext, Input, Troupe};
pub use time::{CompletionTime, Time};
