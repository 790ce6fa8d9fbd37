//! Health gate for rollouts.
//!
//! Probes the target side of a rollout once per tick. A tick fails when
//! any target-revision instance has been not-ready for longer than the
//! readiness grace period. Enough consecutive failing ticks trip the gate.

use tracing::{debug, warn};

use converge_state::{InstanceInfo, RolloutPolicy, RolloutState, Timestamp};

/// Result of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Healthy,
    /// Failing, but below the threshold. Holds the consecutive count.
    Failing(u32),
    /// Reached the threshold on this tick.
    Tripped,
}

/// Tracks consecutive failing ticks for one rollout.
#[derive(Debug)]
pub struct HealthGate {
    consecutive_failures: u32,
    unhealthy_threshold: u32,
    readiness_grace_secs: u64,
    tripped: bool,
}

impl HealthGate {
    pub fn new(policy: &RolloutPolicy) -> Self {
        Self {
            consecutive_failures: 0,
            unhealthy_threshold: policy.unhealthy_threshold.max(1),
            readiness_grace_secs: policy.readiness_grace_secs,
            tripped: false,
        }
    }

    /// Probe the target side of `rollout` and fold the result in.
    ///
    /// Returns [`GateVerdict::Tripped`] once, on the tick the threshold is
    /// reached; later failing ticks report [`GateVerdict::Failing`].
    pub fn observe(
        &mut self,
        rollout: &RolloutState,
        instances: &[InstanceInfo],
        now: Timestamp,
    ) -> GateVerdict {
        let stuck = instances
            .iter()
            .filter(|i| rollout.is_target(i.revision))
            .filter(|i| !i.ready && now.saturating_sub(i.created_at) > self.readiness_grace_secs)
            .count();

        if stuck == 0 {
            if self.consecutive_failures > 0 {
                debug!(workload = %rollout.workload, "rollout health gate recovered");
            }
            self.consecutive_failures = 0;
            return GateVerdict::Healthy;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.unhealthy_threshold && !self.tripped {
            self.tripped = true;
            warn!(
                workload = %rollout.workload,
                failures = self.consecutive_failures,
                threshold = self.unhealthy_threshold,
                stuck,
                "rollout health gate tripped"
            );
            return GateVerdict::Tripped;
        }
        GateVerdict::Failing(self.consecutive_failures)
    }

    /// Start counting afresh, e.g. after an operator resumes.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.tripped = false;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
