//! Reconciler: applies a [`ReconcileAction`] against the backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use converge_state::{InstanceId, OrchestrationBackend, with_timeout};

use crate::action::ReconcileAction;
use crate::error::{ReconcileError, ReconcileResult};

/// What one application of an action achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: Vec<InstanceId>,
    pub deleted: Vec<InstanceId>,
    /// First failure hit, if any.
    pub error: Option<ReconcileError>,
}

impl ReconcileOutcome {
    pub fn create_failed(&self) -> bool {
        self.error.as_ref().is_some_and(ReconcileError::is_create)
    }

    pub fn result(&self) -> ReconcileResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Issues create/delete calls for one workload, each under a deadline.
pub struct Reconciler<B> {
    backend: Arc<B>,
    call_timeout: Duration,
}

impl<B> Clone for Reconciler<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            call_timeout: self.call_timeout,
        }
    }
}

impl<B: OrchestrationBackend> Reconciler<B> {
    pub fn new(backend: Arc<B>, call_timeout: Duration) -> Self {
        Self {
            backend,
            call_timeout,
        }
    }

    /// Apply `action` for `workload`.
    ///
    /// Creates stop at the first failure; the remaining delta is left for
    /// the next tick. Deletes are attempted for every victim and the first
    /// failure is reported.
    pub async fn apply(&self, workload: &str, action: &ReconcileAction) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        match action {
            ReconcileAction::NoAction => {}

            ReconcileAction::CreateInstances { count, revision } => {
                for _ in 0..*count {
                    let created = with_timeout(
                        "create_instance",
                        self.call_timeout,
                        self.backend.create_instance(workload, *revision),
                    )
                    .await;
                    match created {
                        Ok(id) => outcome.created.push(id),
                        Err(e) => {
                            warn!(
                                %workload,
                                revision,
                                created = outcome.created.len(),
                                requested = count,
                                error = %e,
                                "instance creation failed, deferring to next tick"
                            );
                            outcome.error = Some(ReconcileError::Create {
                                created: outcome.created.len() as u32,
                                requested: *count,
                                source: e,
                            });
                            break;
                        }
                    }
                }
                if !outcome.created.is_empty() {
                    info!(%workload, revision, count = outcome.created.len(), "instances created");
                }
            }

            ReconcileAction::DeleteInstances { victims, .. } => {
                for victim in victims {
                    let deleted = with_timeout(
                        "delete_instance",
                        self.call_timeout,
                        self.backend.delete_instance(victim),
                    )
                    .await;
                    match deleted {
                        Ok(()) => {
                            debug!(%workload, instance = %victim, "instance deleted");
                            outcome.deleted.push(victim.clone());
                        }
                        Err(e) => {
                            warn!(%workload, instance = %victim, error = %e, "instance deletion failed");
                            if outcome.error.is_none() {
                                outcome.error = Some(ReconcileError::Delete {
                                    instance: victim.clone(),
                                    source: e,
                                });
                            }
                        }
                    }
                }
                if !outcome.deleted.is_empty() {
                    info!(%workload, count = outcome.deleted.len(), "instances deleted");
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_state::{BackendError, SimBackend};

    fn reconciler(sim: &SimBackend) -> Reconciler<SimBackend> {
        Reconciler::new(Arc::new(sim.clone()), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn creates_requested_count() {
        let sim = SimBackend::with_manual_clock(1000);
        let outcome = reconciler(&sim)
            .apply(
                "web",
                &ReconcileAction::CreateInstances {
                    count: 3,
                    revision: 2,
                },
            )
            .await;

        assert_eq!(outcome.created.len(), 3);
        assert!(outcome.result().is_ok());
        assert_eq!(sim.revision_counts("web").get(&2), Some(&3));
    }

    #[tokio::test]
    async fn first_create_failure_stops_the_tick() {
        let sim = SimBackend::with_manual_clock(1000);
        sim.fail_next_creates(1);
        let outcome = reconciler(&sim)
            .apply(
                "web",
                &ReconcileAction::CreateInstances {
                    count: 3,
                    revision: 1,
                },
            )
            .await;

        assert!(outcome.create_failed());
        assert!(outcome.created.is_empty());
        // No same-tick retry.
        assert_eq!(sim.calls().creates, 1);
        assert_eq!(sim.instance_count("web"), 0);
    }

    #[tokio::test]
    async fn slow_create_times_out() {
        let sim = SimBackend::with_manual_clock(1000);
        sim.set_create_delay(Some(Duration::from_secs(5)));
        let outcome = reconciler(&sim)
            .apply(
                "web",
                &ReconcileAction::CreateInstances {
                    count: 2,
                    revision: 1,
                },
            )
            .await;

        assert_eq!(
            outcome.error,
            Some(ReconcileError::Create {
                created: 0,
                requested: 2,
                source: BackendError::Timeout {
                    op: "create_instance",
                    after_ms: 100
                },
            })
        );
    }

    #[tokio::test]
    async fn deletes_victims() {
        let sim = SimBackend::with_manual_clock(1000);
        let a = sim.seed_instance("web", 1, true);
        let b = sim.seed_instance("web", 1, true);
        let c = sim.seed_instance("web", 1, true);

        let outcome = reconciler(&sim)
            .apply(
                "web",
                &ReconcileAction::DeleteInstances {
                    count: 2,
                    victims: vec![a.clone(), c.clone()],
                },
            )
            .await;

        assert_eq!(outcome.deleted, vec![a, c]);
        let left: Vec<_> = sim.instances("web").into_iter().map(|i| i.id).collect();
        assert_eq!(left, vec![b]);
    }

    #[tokio::test]
    async fn no_action_calls_nothing() {
        let sim = SimBackend::with_manual_clock(1000);
        let outcome = reconciler(&sim).apply("web", &ReconcileAction::NoAction).await;
        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(sim.calls().creates + sim.calls().deletes, 0);
    }
}
