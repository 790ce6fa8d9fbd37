//! Observer: snapshot cache of actual state, one entry per workload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use converge_core::ControllerSettings;
use converge_state::{
    MetricSample, MetricsSource, ObservedState, OrchestrationBackend, Timestamp, with_timeout,
};

/// Cached state for one workload.
#[derive(Debug, Clone)]
struct Entry {
    snapshot: Arc<ObservedState>,
    /// When any instance last returned a sample.
    last_sample_at: Option<Timestamp>,
    /// Set while the published snapshot has had its samples dropped.
    metrics_lost: bool,
}

/// Polls the backend and metrics source and caches the latest snapshot per
/// workload.
pub struct Observer<B, M> {
    backend: Arc<B>,
    metrics: Arc<M>,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    call_timeout: Duration,
    metrics_timeout: Duration,
}

impl<B, M> Clone for Observer<B, M> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            metrics: Arc::clone(&self.metrics),
            entries: Arc::clone(&self.entries),
            call_timeout: self.call_timeout,
            metrics_timeout: self.metrics_timeout,
        }
    }
}

impl<B, M> Observer<B, M>
where
    B: OrchestrationBackend,
    M: MetricsSource,
{
    pub fn new(backend: Arc<B>, metrics: Arc<M>, settings: &ControllerSettings) -> Self {
        Self {
            backend,
            metrics,
            entries: Arc::new(RwLock::new(HashMap::new())),
            call_timeout: settings.call_timeout,
            metrics_timeout: settings.metrics_timeout,
        }
    }

    /// Latest published snapshot for `name`, if it was ever refreshed.
    pub async fn get_observed(&self, name: &str) -> Option<Arc<ObservedState>> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| Arc::clone(&e.snapshot))
    }

    /// Poll the backend and publish a fresh snapshot for `name`.
    ///
    /// Never fails. A failed instance listing keeps the previous instance
    /// list; a workload that has produced no sample for longer than the
    /// metrics timeout is published with no samples at all.
    pub async fn refresh(&self, name: &str, now: Timestamp) -> Arc<ObservedState> {
        let previous = self.entries.read().await.get(name).cloned();

        let instances = match with_timeout(
            "list_instances",
            self.call_timeout,
            self.backend.list_instances(name),
        )
        .await
        {
            Ok(instances) => instances,
            Err(e) => {
                warn!(workload = %name, error = %e, "listing instances failed, keeping previous view");
                previous
                    .as_ref()
                    .map(|p| p.snapshot.instances.clone())
                    .unwrap_or_default()
            }
        };

        let mut samples = Vec::with_capacity(instances.len());
        for instance in &instances {
            let sampled =
                tokio::time::timeout(self.call_timeout, self.metrics.sample_utilization(&instance.id))
                    .await;
            match sampled {
                Ok(Some(utilization_percent)) => samples.push(MetricSample {
                    instance_id: instance.id.clone(),
                    utilization_percent,
                    timestamp: now,
                }),
                Ok(None) => {}
                Err(_) => {
                    debug!(workload = %name, instance = %instance.id, "utilization sample timed out");
                }
            }
        }

        let mut last_sample_at = previous.as_ref().and_then(|p| p.last_sample_at);
        let mut metrics_lost = false;
        if samples.is_empty() {
            let silent_for = last_sample_at.map(|t| now.saturating_sub(t));
            let timed_out = silent_for.is_none_or(|s| s > self.metrics_timeout.as_secs());
            if timed_out {
                metrics_lost = true;
            } else if let Some(p) = &previous {
                // Within the timeout the last readings for surviving
                // instances stay visible; the autoscaler applies freshness.
                samples = p
                    .snapshot
                    .metric_samples
                    .iter()
                    .filter(|s| instances.iter().any(|i| i.id == s.instance_id))
                    .cloned()
                    .collect();
            }
        } else {
            last_sample_at = Some(now);
        }

        let was_lost = previous.as_ref().is_some_and(|p| p.metrics_lost);
        if metrics_lost && !was_lost && last_sample_at.is_some() {
            warn!(
                workload = %name,
                timeout_secs = self.metrics_timeout.as_secs(),
                "no utilization samples within metrics timeout"
            );
        } else if !metrics_lost && was_lost {
            info!(workload = %name, "utilization samples restored");
        }

        let snapshot = Arc::new(ObservedState::from_instances(name, instances, samples, now));
        self.entries.write().await.insert(
            name.to_string(),
            Entry {
                snapshot: Arc::clone(&snapshot),
                last_sample_at,
                metrics_lost,
            },
        );
        snapshot
    }

    /// Drop the cache entry for a deleted workload.
    pub async fn forget(&self, name: &str) {
        if self.entries.write().await.remove(name).is_some() {
            debug!(workload = %name, "observer entry dropped");
        }
    }
}
