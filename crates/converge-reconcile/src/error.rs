//! Reconciler error types.

use thiserror::Error;

use converge_state::{BackendError, InstanceId};

/// A backend call made while applying an action failed. Always transient:
/// the next tick re-evaluates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("create failed after {created} of {requested} instances: {source}")]
    Create {
        created: u32,
        requested: u32,
        source: BackendError,
    },

    #[error("delete of {instance} failed: {source}")]
    Delete {
        instance: InstanceId,
        source: BackendError,
    },
}

impl ReconcileError {
    pub fn is_create(&self) -> bool {
        matches!(self, ReconcileError::Create { .. })
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
