//! Error types for the control loops.

use thiserror::Error;

use converge_rollout::RolloutError;
use converge_state::{Revision, StateError};

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("workload not found: {0}")]
    NotFound(String),

    #[error("workload {0} has no active rollout")]
    NoActiveRollout(String),

    #[error("workload {name}: active rollout reverts to revision {active}, not {requested}")]
    RollbackTarget {
        name: String,
        requested: Revision,
        active: Revision,
    },

    #[error("control loop for {0} has stopped")]
    LoopStopped(String),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    State(#[from] StateError),
}
