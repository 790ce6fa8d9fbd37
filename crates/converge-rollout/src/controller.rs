//! Rollout controller: drives the rollout state machine.
//!
//! `step` is called once per tick with the current target size and the
//! instance list from the tick's snapshot. It returns at most one action.
//! Pause, resume and rollback are only applied between ticks.

use std::sync::Arc;

use tracing::{debug, info};

use converge_state::{
    InstanceId, InstanceInfo, Revision, RolloutEvent, RolloutPhase, RolloutState, Timestamp,
    WorkloadSpec,
};

use crate::budget::RolloutBudget;
use crate::error::{RolloutError, RolloutResult};
use crate::events::EventSink;

/// What a rollout step asks of the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutAction {
    /// Start `count` instances of `revision` on the target side.
    Create { revision: Revision, count: u32 },
    /// Stop these instances.
    Delete { victims: Vec<InstanceId> },
    /// Nothing safe to do this tick; wait for readiness.
    Hold,
    /// Target side complete, source side drained.
    Converged,
}

/// A revision transition for one workload.
pub struct Rollout {
    state: RolloutState,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Rollout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollout").field("state", &self.state).finish()
    }
}

impl Rollout {
    /// Begin moving `workload` from `old_revision` to `new_revision`.
    pub fn start(
        workload: &str,
        old_revision: Revision,
        new_revision: Revision,
        now: Timestamp,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let rollout = Self {
            state: RolloutState::new(workload, old_revision, new_revision, now),
            sink,
        };
        info!(
            workload = %workload,
            from = old_revision,
            to = new_revision,
            "started rolling update"
        );
        rollout.emit(now);
        rollout
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    pub fn phase(&self) -> RolloutPhase {
        self.state.phase
    }

    /// Finished rollouts take no more steps or commands.
    pub fn is_finished(&self) -> bool {
        self.state.finished_at.is_some()
    }

    /// Halt stepping without undoing anything.
    pub fn pause(&mut self, now: Timestamp) -> RolloutResult<()> {
        self.transition(RolloutPhase::Progressing, RolloutPhase::Paused, now)
    }

    /// Continue from the exact split the rollout was paused at.
    pub fn resume(&mut self, now: Timestamp) -> RolloutResult<()> {
        self.transition(RolloutPhase::Paused, RolloutPhase::Progressing, now)
    }

    /// Reverse direction: instances carrying the old template under
    /// `rollback_revision` (or still on `old_revision`) become the target.
    pub fn rollback(&mut self, rollback_revision: Revision, now: Timestamp) -> RolloutResult<()> {
        let from = self.state.phase;
        if !matches!(from, RolloutPhase::Progressing | RolloutPhase::Paused) {
            return Err(RolloutError::InvalidTransition {
                from,
                to: RolloutPhase::RolledBack,
            });
        }
        let latest = self.state.latest_revision();
        if rollback_revision <= latest {
            return Err(RolloutError::RevisionNotIncreasing {
                latest,
                requested: rollback_revision,
            });
        }

        self.state.rollback_revision = Some(rollback_revision);
        self.state.phase = RolloutPhase::RolledBack;
        info!(
            workload = %self.state.workload,
            from = %from,
            abandoned = self.state.new_revision,
            rollback_revision,
            "rolling back"
        );
        self.emit(now);
        Ok(())
    }

    /// Compute this tick's action toward `desired_total` instances on the
    /// target side and none on the source side.
    pub fn step(
        &mut self,
        spec: &WorkloadSpec,
        desired_total: u32,
        instances: &[InstanceInfo],
        now: Timestamp,
    ) -> RolloutResult<RolloutAction> {
        let (target, source): (Vec<&InstanceInfo>, Vec<&InstanceInfo>) = instances
            .iter()
            .partition(|i| self.state.is_target(i.revision));
        self.state.new_replicas = target.len() as u32;
        self.state.old_replicas = source.len() as u32;

        match self.state.phase {
            RolloutPhase::Complete => return Ok(RolloutAction::Converged),
            RolloutPhase::Paused => return Ok(RolloutAction::Hold),
            RolloutPhase::RolledBack if self.is_finished() => return Ok(RolloutAction::Converged),
            RolloutPhase::Progressing | RolloutPhase::RolledBack => {}
        }

        let budget = RolloutBudget::resolve(spec, desired_total);
        let target_count = target.len() as u32;
        let total = instances.len() as u32;
        let ready = instances.iter().filter(|i| i.ready).count() as u32;

        if target_count == desired_total && source.is_empty() {
            self.finish(now);
            return Ok(RolloutAction::Converged);
        }

        // Grow the target side into the surge room first.
        if target_count < desired_total && total < budget.max_total() {
            let count = (desired_total - target_count).min(budget.max_total() - total);
            debug!(
                workload = %self.state.workload,
                revision = self.state.create_revision(),
                count,
                total,
                max_total = budget.max_total(),
                "rollout step: create"
            );
            return Ok(RolloutAction::Create {
                revision: self.state.create_revision(),
                count,
            });
        }

        // Then drain the source side, or trim target excess once drained.
        let (pool, excess) = if source.is_empty() {
            (target, target_count.saturating_sub(desired_total))
        } else {
            let count = source.len() as u32;
            (source, count)
        };
        let victims = pick_victims(&pool, excess, ready.saturating_sub(budget.min_ready()));
        if !victims.is_empty() {
            debug!(
                workload = %self.state.workload,
                count = victims.len(),
                ready,
                min_ready = budget.min_ready(),
                "rollout step: delete"
            );
            return Ok(RolloutAction::Delete { victims });
        }

        if total > budget.max_total() || ready < budget.min_ready() {
            return Err(RolloutError::Violation {
                total,
                max_total: budget.max_total(),
                ready,
                min_ready: budget.min_ready(),
            });
        }
        Ok(RolloutAction::Hold)
    }

    fn finish(&mut self, now: Timestamp) {
        self.state.finished_at = Some(now);
        if self.state.phase == RolloutPhase::Progressing {
            self.state.phase = RolloutPhase::Complete;
            info!(
                workload = %self.state.workload,
                revision = self.state.new_revision,
                "rolling update completed"
            );
            self.emit(now);
        } else {
            info!(
                workload = %self.state.workload,
                revision = self.state.latest_revision(),
                "rollback converged"
            );
        }
    }

    fn transition(&mut self, from: RolloutPhase, to: RolloutPhase, now: Timestamp) -> RolloutResult<()> {
        if self.state.phase != from {
            return Err(RolloutError::InvalidTransition {
                from: self.state.phase,
                to,
            });
        }
        self.state.phase = to;
        info!(workload = %self.state.workload, from = %from, to = %to, "rollout phase changed");
        self.emit(now);
        Ok(())
    }

    fn emit(&self, now: Timestamp) {
        self.sink.emit(RolloutEvent::for_state(&self.state, now));
    }
}

/// Up to `limit` victims from `pool`: every not-ready instance (they do
/// not consume the unavailability budget), then ready ones, oldest first,
/// while `ready_budget` allows.
fn pick_victims(pool: &[&InstanceInfo], limit: u32, ready_budget: u32) -> Vec<InstanceId> {
    let mut ordered = pool.to_vec();
    ordered.sort_by(|a, b| {
        a.ready
            .cmp(&b.ready)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut victims = Vec::new();
    let mut ready_left = ready_budget;
    for instance in ordered {
        if victims.len() as u32 >= limit {
            break;
        }
        if instance.ready {
            if ready_left == 0 {
                break;
            }
            ready_left -= 1;
        }
        victims.push(instance.id.clone());
    }
    victims
}
