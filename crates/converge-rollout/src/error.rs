//! Rollout error types.

use thiserror::Error;

use converge_state::{Revision, RolloutPhase};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RolloutError {
    #[error("cannot move rollout from {from} to {to}")]
    InvalidTransition { from: RolloutPhase, to: RolloutPhase },

    #[error("rollback revision {requested} must be greater than {latest}")]
    RevisionNotIncreasing { latest: Revision, requested: Revision },

    /// Observed state is outside the surge/unavailability envelope and no
    /// step can move it back in. Position is held until the next tick.
    #[error(
        "rollout bounds violated: {total} instances (max {max_total}), {ready} ready (min {min_ready})"
    )]
    Violation {
        total: u32,
        max_total: u32,
        ready: u32,
        min_ready: u32,
    },
}

pub type RolloutResult<T> = Result<T, RolloutError>;
