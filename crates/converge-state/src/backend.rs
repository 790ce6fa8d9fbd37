//! External collaborators: the orchestration backend and the metrics source.
//!
//! The control loop only ever creates, deletes and lists instances, and
//! samples their utilization. Everything behind these calls (API server,
//! kubelet, cloud autoscaling groups, a metrics pipeline) is out of scope.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::store::epoch_secs;
use crate::types::{InstanceId, InstanceInfo, Revision, Timestamp};

pub type BackendResult<T> = Result<T, BackendError>;

/// A failed or timed-out backend call. Always treated as transient by the
/// control loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Stand-in for the API server / kubelet / cloud ASG.
pub trait OrchestrationBackend: Send + Sync + 'static {
    /// Start one instance of `workload` stamped with `revision`.
    fn create_instance(
        &self,
        workload: &str,
        revision: Revision,
    ) -> impl Future<Output = BackendResult<InstanceId>> + Send;

    /// Stop an instance. Deleting an already-gone instance is not an error.
    fn delete_instance(&self, instance_id: &str) -> impl Future<Output = BackendResult<()>> + Send;

    /// Every instance currently belonging to `workload`.
    fn list_instances(
        &self,
        workload: &str,
    ) -> impl Future<Output = BackendResult<Vec<InstanceInfo>>> + Send;
}

/// Stand-in for metrics-server / Prometheus.
pub trait MetricsSource: Send + Sync + 'static {
    /// Current utilization percentage, or `None` when unavailable.
    fn sample_utilization(&self, instance_id: &str) -> impl Future<Output = Option<f64>> + Send;
}

/// Source of tick timestamps for the control loop.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        epoch_secs()
    }
}

/// Run a backend call under a deadline, turning expiry into
/// [`BackendError::Timeout`].
pub async fn with_timeout<T, F>(op: &'static str, limit: Duration, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            op,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_becomes_backend_error() {
        let result: BackendResult<()> = with_timeout("create_instance", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(BackendError::Timeout {
                op: "create_instance",
                after_ms: 10
            })
        );
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("list_instances", Duration::from_secs(1), async {
            Ok::<_, BackendError>(3)
        })
        .await;
        assert_eq!(result, Ok(3));
    }
}
