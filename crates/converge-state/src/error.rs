//! Error types for the Converge state store.

use converge_core::IntOrPercent;
use thiserror::Error;

use crate::types::Revision;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("config error: {0}")]
    Config(#[from] converge_core::ConfigError),
}

/// Reasons a workload spec is rejected at submission time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("name '{0}' must be at most 63 characters of [a-z0-9-]")]
    InvalidName(String),

    #[error("min_replicas ({min}) exceeds max_replicas ({max})")]
    BoundsInverted { min: u32, max: u32 },

    #[error("target_utilization_percent must be in (0, 100], got {0}")]
    TargetUtilization(u32),

    #[error("replicas ({replicas}) outside [{min}, {max}]")]
    ReplicasOutOfBounds { replicas: u32, min: u32, max: u32 },

    #[error("max_unavailable percentage must be at most 100%, got {0}%")]
    UnavailablePercent(u32),

    #[error("max_surge {surge} exceeds max_replicas ({max}) or 100%")]
    SurgeOutOfRange { surge: IntOrPercent, max: u32 },

    #[error("scale-up can never happen: scale_up_percent and scale_up_min_step are both 0")]
    ScaleUpDisabled,

    #[error("template image must not be empty")]
    EmptyImage,

    #[error("revision {submitted} is lower than stored revision {stored}")]
    RevisionRegression { stored: Revision, submitted: Revision },
}

impl StateError {
    /// Whether this error is the caller's fault (bad input) rather than a
    /// storage failure.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(self, StateError::InvalidSpec(_))
    }
}
