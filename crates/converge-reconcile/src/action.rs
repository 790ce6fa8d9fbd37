//! Pure reconciliation: what to do this tick.

use converge_state::{InstanceId, InstanceInfo, ObservedState, Revision, ScalingDecision, WorkloadSpec};

/// The single change a tick asks of the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Start `count` instances stamped with `revision`.
    CreateInstances { count: u32, revision: Revision },
    /// Stop `count` instances; `victims` holds exactly `count` ids.
    DeleteInstances { count: u32, victims: Vec<InstanceId> },
    NoAction,
}

impl ReconcileAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, ReconcileAction::NoAction)
    }
}

/// Replica count to converge on.
///
/// An explicit `spec.replicas` overrides the autoscaler; either way the
/// result is within the spec's bounds.
pub fn desired_target(spec: &WorkloadSpec, decision: &ScalingDecision) -> u32 {
    let requested = spec.replicas.unwrap_or(decision.desired_replicas);
    spec.clamp_replicas(requested)
}

/// Compute the action that moves `observed` to the target.
///
/// Deterministic: identical inputs always produce the same action, and an
/// action applied in part leaves only the remaining delta for next time.
pub fn reconcile(
    spec: &WorkloadSpec,
    observed: &ObservedState,
    decision: &ScalingDecision,
) -> ReconcileAction {
    let target = desired_target(spec, decision);
    let current = observed.current_replicas;

    if current < target {
        ReconcileAction::CreateInstances {
            count: target - current,
            revision: spec.revision,
        }
    } else if current > target {
        let count = current - target;
        ReconcileAction::DeleteInstances {
            count,
            victims: select_victims(&observed.instances, count as usize),
        }
    } else {
        ReconcileAction::NoAction
    }
}

/// Pick `count` instances to delete: not-ready first, then oldest by
/// creation time, ties broken by id.
pub fn select_victims(instances: &[InstanceInfo], count: usize) -> Vec<InstanceId> {
    let mut ordered: Vec<&InstanceInfo> = instances.iter().collect();
    ordered.sort_by(|a, b| {
        a.ready
            .cmp(&b.ready)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
        .into_iter()
        .take(count)
        .map(|i| i.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_state::ScaleReason;

    fn instance(id: &str, ready: bool, created_at: u64) -> InstanceInfo {
        InstanceInfo {
            id: id.to_string(),
            revision: 3,
            ready,
            created_at,
        }
    }

    fn spec() -> WorkloadSpec {
        let mut spec = WorkloadSpec::new("web", "registry.local/web:3", 1, 10, 60);
        spec.revision = 3;
        spec
    }

    fn decision(desired: u32) -> ScalingDecision {
        ScalingDecision {
            desired_replicas: desired,
            reason: ScaleReason::AboveTarget,
            raw_replicas: Some(desired),
            average_utilization: Some(75.0),
        }
    }

    fn observed(instances: Vec<InstanceInfo>) -> ObservedState {
        ObservedState::from_instances("web", instances, Vec::new(), 2000)
    }

    #[test]
    fn creates_missing_instances_at_spec_revision() {
        let obs = observed(vec![instance("a", true, 100), instance("b", true, 200)]);
        assert_eq!(
            reconcile(&spec(), &obs, &decision(5)),
            ReconcileAction::CreateInstances {
                count: 3,
                revision: 3
            }
        );
    }

    #[test]
    fn deletes_unready_then_oldest() {
        let obs = observed(vec![
            instance("d", true, 400),
            instance("a", true, 100),
            instance("c", false, 300),
            instance("b", true, 100),
            instance("e", true, 500),
        ]);
        assert_eq!(
            reconcile(&spec(), &obs, &decision(2)),
            ReconcileAction::DeleteInstances {
                count: 3,
                victims: vec!["c".to_string(), "a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn equal_counts_are_no_action() {
        let obs = observed(vec![instance("a", true, 100), instance("b", false, 200)]);
        assert!(reconcile(&spec(), &obs, &decision(2)).is_noop());
    }

    #[test]
    fn repeated_calls_agree() {
        let obs = observed(vec![
            instance("a", true, 100),
            instance("b", false, 200),
            instance("c", true, 50),
        ]);
        let first = reconcile(&spec(), &obs, &decision(1));
        let second = reconcile(&spec(), &obs, &decision(1));
        assert_eq!(first, second);
    }

    #[test]
    fn partial_apply_leaves_remaining_delta() {
        let s = spec();
        let d = decision(6);
        let mut instances = vec![instance("a", true, 100), instance("b", true, 100)];
        assert_eq!(
            reconcile(&s, &observed(instances.clone()), &d),
            ReconcileAction::CreateInstances {
                count: 4,
                revision: 3
            }
        );

        // One of the four creates landed before a failure.
        instances.push(instance("c", false, 2000));
        assert_eq!(
            reconcile(&s, &observed(instances), &d),
            ReconcileAction::CreateInstances {
                count: 3,
                revision: 3
            }
        );
    }

    #[test]
    fn explicit_replicas_override_decision() {
        let mut s = spec();
        s.replicas = Some(4);
        assert_eq!(desired_target(&s, &decision(9)), 4);

        s.replicas = Some(40);
        assert_eq!(desired_target(&s, &decision(9)), 10);

        s.replicas = None;
        assert_eq!(desired_target(&s, &decision(9)), 9);
    }

    #[test]
    fn victim_count_capped_by_instances() {
        let victims = select_victims(&[instance("a", true, 1)], 3);
        assert_eq!(victims, vec!["a".to_string()]);
    }
}
