//! Surge and unavailability limits for one rollout step.

use converge_core::resolve_rollout_budget;
use converge_state::WorkloadSpec;

/// Absolute limits for a step toward `desired_total` instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutBudget {
    pub desired_total: u32,
    pub max_surge: u32,
    pub max_unavailable: u32,
}

impl RolloutBudget {
    /// Resolve the spec's surge/unavailability against `desired_total`.
    pub fn resolve(spec: &WorkloadSpec, desired_total: u32) -> Self {
        let (max_surge, max_unavailable) =
            resolve_rollout_budget(spec.max_surge, spec.max_unavailable, desired_total);
        Self {
            desired_total,
            max_surge,
            max_unavailable,
        }
    }

    /// Most instances (both revisions) allowed at once.
    pub fn max_total(&self) -> u32 {
        self.desired_total.saturating_add(self.max_surge)
    }

    /// Fewest ready instances (both revisions) allowed at once.
    pub fn min_ready(&self) -> u32 {
        self.desired_total.saturating_sub(self.max_unavailable)
    }
}
