//! converge-core: configuration and shared value types for Converge.
//!
//! Holds the pieces every other crate needs before it can talk about a
//! workload: the `converge.toml` schema, duration strings (`"15s"`,
//! `"5m"`), and the count-or-percentage values used for rollout surge
//! and unavailability budgets.

pub mod config;
pub mod duration;
pub mod error;
pub mod quantity;

pub use config::{
    BehaviorConfig, ControllerConfig, ControllerSettings, ConvergeConfig, RolloutConfig,
    SimulateConfig, WorkloadConfig,
};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use quantity::{IntOrPercent, resolve_rollout_budget};
