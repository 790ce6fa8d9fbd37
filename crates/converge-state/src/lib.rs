//! converge-state: domain model and persistence for Converge.
//!
//! Workload specs, their revision history and archived rollouts live in
//! [redb](https://docs.rs/redb), JSON-serialized into `&[u8]` value
//! columns. Composite keys (`{workload}:{revision:020}`) keep per-workload
//! records contiguous for prefix scans.
//!
//! The crate also defines the two external collaborators of the control
//! loop ([`OrchestrationBackend`] and [`MetricsSource`]) and a scriptable
//! in-process implementation of both, [`SimBackend`].

pub mod backend;
pub mod error;
pub mod sim;
pub mod store;
pub mod tables;
pub mod types;
pub mod validate;

pub use backend::{
    BackendError, BackendResult, Clock, MetricsSource, OrchestrationBackend, SystemClock,
    with_timeout,
};
pub use error::{SpecError, StateError, StateResult};
pub use sim::{ReadinessMode, SimBackend, SimCalls};
pub use store::{StateStore, epoch_secs};
pub use types::*;
pub use validate::validate_spec;
