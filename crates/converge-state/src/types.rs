//! Domain types for Converge.
//!
//! Desired state (`WorkloadSpec`), observed state (`ObservedState`), the
//! per-tick autoscaler output (`ScalingDecision`) and the rollout record
//! (`RolloutState`). All types are serializable to/from JSON for storage
//! in redb tables and for the REST API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use converge_core::{IntOrPercent, WorkloadConfig, parse_duration};

use crate::error::{StateError, StateResult};

/// Unique workload name.
pub type WorkloadName = String;

/// Identifier of a running instance, assigned by the orchestration backend.
pub type InstanceId = String;

/// Template version marker. Never decreases for a given workload.
pub type Revision = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

// ── Workload spec ────────────────────────────────────────────────

/// Desired state for one workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSpec {
    pub name: WorkloadName,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Utilization the autoscaler holds the average to, in (0, 100].
    pub target_utilization_percent: u32,
    /// Assigned by the state store; bumped on every template change.
    #[serde(default)]
    pub revision: Revision,
    pub template: WorkloadTemplate,
    /// Explicit replica request. When set, the autoscaler recommendation
    /// is ignored (bounds still apply).
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub max_surge: IntOrPercent,
    #[serde(default)]
    pub max_unavailable: IntOrPercent,
    #[serde(default)]
    pub behavior: ScalingBehavior,
    #[serde(default)]
    pub rollout: RolloutPolicy,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
}

/// The content a revision stands for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadTemplate {
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Rate limits and stabilization windows for the autoscaler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScalingBehavior {
    /// Largest increase per tick, as a percentage of current replicas.
    pub scale_up_percent: u32,
    /// Increase always allowed per tick regardless of the percentage, so
    /// small workloads (and zero) can grow.
    pub scale_up_min_step: u32,
    /// Largest decrease per tick, as a percentage of current replicas.
    pub scale_down_percent: u32,
    pub scale_up_stabilization_secs: u64,
    pub scale_down_stabilization_secs: u64,
}

impl Default for ScalingBehavior {
    fn default() -> Self {
        Self {
            scale_up_percent: 100,
            scale_up_min_step: 4,
            scale_down_percent: 100,
            scale_up_stabilization_secs: 0,
            scale_down_stabilization_secs: 300,
        }
    }
}

/// Automated health gate for rollouts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RolloutPolicy {
    /// Consecutive failing ticks before the gate trips.
    pub unhealthy_threshold: u32,
    /// How long a new instance may stay not-ready before it counts as failing.
    pub readiness_grace_secs: u64,
    /// Roll back when the gate trips; pause instead when false.
    pub auto_rollback: bool,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            readiness_grace_secs: 60,
            auto_rollback: true,
        }
    }
}

impl WorkloadSpec {
    /// A spec with default surge, unavailability, behavior and rollout
    /// policy. Revision and timestamps are filled in by the store.
    pub fn new(
        name: &str,
        image: &str,
        min_replicas: u32,
        max_replicas: u32,
        target_utilization_percent: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            min_replicas,
            max_replicas,
            target_utilization_percent,
            revision: 0,
            template: WorkloadTemplate {
                image: image.to_string(),
                env: BTreeMap::new(),
            },
            replicas: None,
            max_surge: IntOrPercent::default(),
            max_unavailable: IntOrPercent::default(),
            behavior: ScalingBehavior::default(),
            rollout: RolloutPolicy::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Build the key for the workloads table.
    pub fn table_key(&self) -> &str {
        &self.name
    }

    /// Clamp a replica count into `[min_replicas, max_replicas]`.
    pub fn clamp_replicas(&self, n: u32) -> u32 {
        n.clamp(self.min_replicas, self.max_replicas.max(self.min_replicas))
    }
}

impl TryFrom<&WorkloadConfig> for WorkloadSpec {
    type Error = StateError;

    fn try_from(cfg: &WorkloadConfig) -> StateResult<Self> {
        let defaults = ScalingBehavior::default();
        let behavior = match &cfg.behavior {
            Some(b) => ScalingBehavior {
                scale_up_percent: b.scale_up_percent.unwrap_or(defaults.scale_up_percent),
                scale_up_min_step: b.scale_up_min_step.unwrap_or(defaults.scale_up_min_step),
                scale_down_percent: b.scale_down_percent.unwrap_or(defaults.scale_down_percent),
                scale_up_stabilization_secs: match &b.scale_up_stabilization {
                    Some(s) => parse_duration(s)?.as_secs(),
                    None => defaults.scale_up_stabilization_secs,
                },
                scale_down_stabilization_secs: match &b.scale_down_stabilization {
                    Some(s) => parse_duration(s)?.as_secs(),
                    None => defaults.scale_down_stabilization_secs,
                },
            },
            None => defaults,
        };

        let policy_defaults = RolloutPolicy::default();
        let rollout = match &cfg.rollout {
            Some(r) => RolloutPolicy {
                unhealthy_threshold: r
                    .unhealthy_threshold
                    .unwrap_or(policy_defaults.unhealthy_threshold),
                readiness_grace_secs: match &r.readiness_grace {
                    Some(s) => parse_duration(s)?.as_secs(),
                    None => policy_defaults.readiness_grace_secs,
                },
                auto_rollback: r.auto_rollback.unwrap_or(policy_defaults.auto_rollback),
            },
            None => policy_defaults,
        };

        Ok(WorkloadSpec {
            name: cfg.name.clone(),
            min_replicas: cfg.min_replicas.unwrap_or(1),
            max_replicas: cfg.max_replicas,
            target_utilization_percent: cfg.target_utilization_percent,
            revision: 0,
            template: WorkloadTemplate {
                image: cfg.image.clone(),
                env: cfg.env.clone(),
            },
            replicas: cfg.replicas,
            max_surge: cfg.max_surge.unwrap_or_default(),
            max_unavailable: cfg.max_unavailable.unwrap_or_default(),
            behavior,
            rollout,
            created_at: 0,
            updated_at: 0,
        })
    }
}

/// A template as recorded in the revision history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevisionRecord {
    pub workload: WorkloadName,
    pub revision: Revision,
    pub template: WorkloadTemplate,
    pub created_at: Timestamp,
}

impl RevisionRecord {
    /// Zero-padded so lexicographic order matches numeric order.
    pub fn table_key(&self) -> String {
        revision_key(&self.workload, self.revision)
    }
}

pub(crate) fn revision_key(workload: &str, revision: Revision) -> String {
    format!("{workload}:{revision:020}")
}

// ── Observed state ───────────────────────────────────────────────

/// One instance as reported by the orchestration backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub revision: Revision,
    pub ready: bool,
    pub created_at: Timestamp,
}

/// One utilization reading for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub instance_id: InstanceId,
    pub utilization_percent: f64,
    pub timestamp: Timestamp,
}

/// Runtime facts for a workload at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedState {
    pub workload: WorkloadName,
    pub current_replicas: u32,
    /// Always `<= current_replicas`.
    pub ready_replicas: u32,
    pub instances: Vec<InstanceInfo>,
    pub metric_samples: Vec<MetricSample>,
    pub observed_at: Timestamp,
}

impl ObservedState {
    /// A snapshot for a workload nothing is known about yet.
    pub fn empty(workload: &str, observed_at: Timestamp) -> Self {
        Self::from_instances(workload, Vec::new(), Vec::new(), observed_at)
    }

    /// Build a snapshot, deriving the replica counts from `instances`.
    pub fn from_instances(
        workload: &str,
        instances: Vec<InstanceInfo>,
        metric_samples: Vec<MetricSample>,
        observed_at: Timestamp,
    ) -> Self {
        let current_replicas = instances.len() as u32;
        let ready_replicas = instances.iter().filter(|i| i.ready).count() as u32;
        Self {
            workload: workload.to_string(),
            current_replicas,
            ready_replicas,
            instances,
            metric_samples,
            observed_at,
        }
    }
}

// ── Scaling decision ─────────────────────────────────────────────

/// Why the autoscaler picked its replica count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReason {
    /// Not enough fresh samples; holding the current count.
    NoMetrics,
    /// Scaling down, utilization below target.
    BelowTarget,
    /// Scaling up, utilization above target.
    AboveTarget,
    /// A rate limit or stabilization window changed the recommendation.
    RateLimited,
    /// The recommendation was clamped to min or max replicas.
    AtBound,
    /// Utilization matches target; no change.
    AtTarget,
}

impl fmt::Display for ScaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleReason::NoMetrics => "no_metrics",
            ScaleReason::BelowTarget => "below_target",
            ScaleReason::AboveTarget => "above_target",
            ScaleReason::RateLimited => "rate_limited",
            ScaleReason::AtBound => "at_bound",
            ScaleReason::AtTarget => "at_target",
        };
        f.write_str(s)
    }
}

/// Output of one autoscaler evaluation. Produced fresh every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    /// Already within `[min_replicas, max_replicas]`.
    pub desired_replicas: u32,
    pub reason: ScaleReason,
    /// `ceil(current * avg / target)` before bounds and rate limits.
    pub raw_replicas: Option<u32>,
    pub average_utilization: Option<f64>,
}

impl ScalingDecision {
    pub fn no_metrics(desired_replicas: u32) -> Self {
        Self {
            desired_replicas,
            reason: ScaleReason::NoMetrics,
            raw_replicas: None,
            average_utilization: None,
        }
    }
}

// ── Rollouts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    Progressing,
    Paused,
    Complete,
    RolledBack,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RolloutPhase::Progressing => "progressing",
            RolloutPhase::Paused => "paused",
            RolloutPhase::Complete => "complete",
            RolloutPhase::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// An in-progress (or archived) revision transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutState {
    pub workload: WorkloadName,
    pub old_revision: Revision,
    pub new_revision: Revision,
    /// Set once rolled back: the fresh revision marker carrying the old
    /// template.
    pub rollback_revision: Option<Revision>,
    /// Instances on the side being drained.
    pub old_replicas: u32,
    /// Instances on the side being scaled up.
    pub new_replicas: u32,
    pub phase: RolloutPhase,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl RolloutState {
    pub fn new(workload: &str, old_revision: Revision, new_revision: Revision, now: Timestamp) -> Self {
        Self {
            workload: workload.to_string(),
            old_revision,
            new_revision,
            rollback_revision: None,
            old_replicas: 0,
            new_replicas: 0,
            phase: RolloutPhase::Progressing,
            started_at: now,
            finished_at: None,
        }
    }

    /// Whether an instance of `revision` counts toward the side being
    /// scaled up. Before a rollback that is the new revision; afterwards
    /// it is any revision carrying the old template.
    pub fn is_target(&self, revision: Revision) -> bool {
        match self.rollback_revision {
            Some(rollback) => revision == rollback || revision == self.old_revision,
            None => revision == self.new_revision,
        }
    }

    /// Revision marker stamped on instances created by the next step.
    pub fn create_revision(&self) -> Revision {
        self.rollback_revision.unwrap_or(self.new_revision)
    }

    /// Highest revision marker this rollout has touched.
    pub fn latest_revision(&self) -> Revision {
        self.rollback_revision.unwrap_or(self.new_revision)
    }

    /// Key for the rollout archive table.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:020}:{:020}",
            self.workload,
            self.started_at,
            self.latest_revision()
        )
    }
}

/// Emitted once per rollout phase transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutEvent {
    pub workload: WorkloadName,
    pub phase: RolloutPhase,
    pub old_revision: Revision,
    pub new_revision: Revision,
    pub rollback_revision: Option<Revision>,
    pub at: Timestamp,
}

impl RolloutEvent {
    pub fn for_state(state: &RolloutState, at: Timestamp) -> Self {
        Self {
            workload: state.workload.clone(),
            phase: state.phase,
            old_revision: state.old_revision,
            new_revision: state.new_revision,
            rollback_revision: state.rollback_revision,
            at,
        }
    }
}

// ── Status ───────────────────────────────────────────────────────

/// Control-loop view of a workload, published after every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadStatus {
    pub name: WorkloadName,
    pub revision: Revision,
    pub current_replicas: u32,
    pub ready_replicas: u32,
    pub desired_replicas: u32,
    pub last_decision: Option<ScalingDecision>,
    pub rollout: Option<RolloutState>,
    /// Informational; attempts continue while degraded.
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_tick_at: Option<Timestamp>,
}

impl WorkloadStatus {
    pub fn pending(name: &str, revision: Revision) -> Self {
        Self {
            name: name.to_string(),
            revision,
            current_replicas: 0,
            ready_replicas: 0,
            desired_replicas: 0,
            last_decision: None,
            rollout: None,
            degraded: false,
            consecutive_failures: 0,
            last_error: None,
            last_tick_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, revision: Revision, ready: bool) -> InstanceInfo {
        InstanceInfo {
            id: id.to_string(),
            revision,
            ready,
            created_at: 1000,
        }
    }

    #[test]
    fn observed_counts_derive_from_instances() {
        let observed = ObservedState::from_instances(
            "web",
            vec![instance("a", 1, true), instance("b", 1, false), instance("c", 1, true)],
            Vec::new(),
            1000,
        );
        assert_eq!(observed.current_replicas, 3);
        assert_eq!(observed.ready_replicas, 2);
    }

    #[test]
    fn rollout_target_side_flips_on_rollback() {
        let mut state = RolloutState::new("web", 3, 4, 1000);
        assert!(state.is_target(4));
        assert!(!state.is_target(3));
        assert_eq!(state.create_revision(), 4);

        state.rollback_revision = Some(5);
        assert!(state.is_target(3));
        assert!(state.is_target(5));
        assert!(!state.is_target(4));
        assert_eq!(state.create_revision(), 5);
    }

    #[test]
    fn spec_from_config_applies_defaults() {
        let cfg = WorkloadConfig {
            name: "web".to_string(),
            min_replicas: None,
            max_replicas: 8,
            target_utilization_percent: 60,
            replicas: None,
            image: "registry.local/web:1".to_string(),
            env: BTreeMap::new(),
            max_surge: None,
            max_unavailable: Some(IntOrPercent::Int(1)),
            behavior: Some(converge_core::BehaviorConfig {
                scale_down_stabilization: Some("2m".to_string()),
                ..Default::default()
            }),
            rollout: None,
            simulate: None,
        };
        let spec = WorkloadSpec::try_from(&cfg).unwrap();
        assert_eq!(spec.min_replicas, 1);
        assert_eq!(spec.max_surge, IntOrPercent::Percent(25));
        assert_eq!(spec.max_unavailable, IntOrPercent::Int(1));
        assert_eq!(spec.behavior.scale_down_stabilization_secs, 120);
        assert_eq!(spec.behavior.scale_up_percent, 100);
        assert_eq!(spec.rollout, RolloutPolicy::default());
    }

    #[test]
    fn scale_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ScaleReason::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }
}
