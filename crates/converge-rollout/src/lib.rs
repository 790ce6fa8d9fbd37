//! converge-rollout: rolling updates between revisions.
//!
//! A rollout moves a workload's instances from one revision to another in
//! bounded steps: total instances never exceed `desired + max_surge` and
//! ready instances never drop below `desired - max_unavailable`. Rollbacks
//! are rollouts too: they move forward to a fresh revision that carries the
//! old template.
//!
//! # Components
//!
//! - **`budget`**: surge/unavailability resolution for one step
//! - **`controller`**: rollout state machine (step, pause, resume, rollback)
//! - **`health`**: health gate over new-revision readiness
//! - **`events`**: phase transition sinks (tracing, channel)
//!
//! # State machine
//!
//! ```text
//! Progressing ──> Complete
//!      │  ▲
//!      ▼  │
//!     Paused
//!      │
//!      ▼
//! RolledBack   (also reachable from Progressing)
//! ```

pub mod budget;
pub mod controller;
pub mod error;
pub mod events;
pub mod health;

pub use budget::RolloutBudget;
pub use controller::{Rollout, RolloutAction};
pub use error::{RolloutError, RolloutResult};
pub use events::{ChannelSink, EventSink, LogSink, MemorySink};
pub use health::{GateVerdict, HealthGate};
