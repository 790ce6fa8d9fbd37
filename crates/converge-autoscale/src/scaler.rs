//! Autoscaler: utilization-driven replica recommendations.
//!
//! One `Autoscaler` belongs to one workload's control loop. It is a pure
//! function of `(spec, observed, now)` except for the recommendation
//! history it keeps for the stabilization windows.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use converge_state::{ObservedState, ScaleReason, ScalingDecision, Timestamp, WorkloadSpec};

/// A clamped recommendation recorded for the stabilization windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Recommendation {
    at: Timestamp,
    replicas: u32,
}

/// Evaluates utilization against a workload's target and recommends a
/// replica count.
#[derive(Debug)]
pub struct Autoscaler {
    /// Samples older than twice this are ignored.
    sampling_interval: Duration,
    history: VecDeque<Recommendation>,
}

impl Autoscaler {
    pub fn new(sampling_interval: Duration) -> Self {
        Self {
            sampling_interval,
            history: VecDeque::new(),
        }
    }

    /// Drop the recommendation history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Produce this tick's decision.
    ///
    /// `desired_replicas` is always within `[min_replicas, max_replicas]`.
    pub fn decide(
        &mut self,
        spec: &WorkloadSpec,
        observed: &ObservedState,
        now: Timestamp,
    ) -> ScalingDecision {
        self.decide_at_scale(spec, observed, observed.current_replicas, now)
    }

    /// Like [`decide`](Self::decide), but relative to `current` instead of
    /// the observed instance count.
    ///
    /// During a rollout the observed count includes surge instances; the
    /// control loop passes the size the rollout is converging on so the
    /// surge does not feed back into the recommendation.
    pub fn decide_at_scale(
        &mut self,
        spec: &WorkloadSpec,
        observed: &ObservedState,
        current: u32,
        now: Timestamp,
    ) -> ScalingDecision {
        let freshness = 2 * self.sampling_interval.as_secs();

        let fresh: Vec<f64> = observed
            .metric_samples
            .iter()
            .filter(|s| now.saturating_sub(s.timestamp) <= freshness)
            .map(|s| s.utilization_percent)
            .collect();

        if fresh.is_empty() || fresh.len() < observed.ready_replicas as usize {
            debug!(
                workload = %spec.name,
                fresh = fresh.len(),
                ready = observed.ready_replicas,
                "not enough fresh samples, holding replica count"
            );
            return ScalingDecision::no_metrics(spec.clamp_replicas(current));
        }

        let average = fresh.iter().sum::<f64>() / fresh.len() as f64;
        let target = spec.target_utilization_percent.max(1) as f64;
        let raw = (current as f64 * average / target).ceil() as u32;

        let clamped = spec.clamp_replicas(raw);
        let at_bound = clamped != raw;

        self.record(spec, now, clamped);

        let limited = rate_limit(spec, current, clamped);
        let stabilized = self.stabilize(spec, now, current, clamped, limited);
        let desired = spec.clamp_replicas(stabilized);

        let reason = if desired != stabilized {
            ScaleReason::AtBound
        } else if desired != clamped {
            ScaleReason::RateLimited
        } else if at_bound {
            ScaleReason::AtBound
        } else if desired > current {
            ScaleReason::AboveTarget
        } else if desired < current {
            ScaleReason::BelowTarget
        } else {
            ScaleReason::AtTarget
        };

        if desired != current {
            debug!(
                workload = %spec.name,
                from = current,
                to = desired,
                raw,
                average_utilization = average,
                target = spec.target_utilization_percent,
                %reason,
                "scaling recommendation"
            );
        }

        ScalingDecision {
            desired_replicas: desired,
            reason,
            raw_replicas: Some(raw),
            average_utilization: Some(average),
        }
    }

    fn record(&mut self, spec: &WorkloadSpec, now: Timestamp, replicas: u32) {
        let keep = spec
            .behavior
            .scale_up_stabilization_secs
            .max(spec.behavior.scale_down_stabilization_secs);
        while self
            .history
            .front()
            .is_some_and(|r| now.saturating_sub(r.at) > keep)
        {
            self.history.pop_front();
        }
        self.history.push_back(Recommendation { at: now, replicas });
    }

    /// Apply the stabilization floor (scale-down) or ceiling (scale-up) on
    /// top of the rate-limited value.
    fn stabilize(
        &self,
        spec: &WorkloadSpec,
        now: Timestamp,
        current: u32,
        clamped: u32,
        limited: u32,
    ) -> u32 {
        if clamped < current {
            let window = spec.behavior.scale_down_stabilization_secs;
            if window == 0 {
                return limited;
            }
            let peak = self
                .within(now, window)
                .map(|r| r.replicas)
                .max()
                .unwrap_or(clamped);
            limited.max(current.min(peak))
        } else if clamped > current {
            let window = spec.behavior.scale_up_stabilization_secs;
            if window == 0 {
                return limited;
            }
            let trough = self
                .within(now, window)
                .map(|r| r.replicas)
                .min()
                .unwrap_or(clamped);
            limited.min(current.max(trough))
        } else {
            limited
        }
    }

    fn within(&self, now: Timestamp, window: u64) -> impl Iterator<Item = &Recommendation> {
        self.history
            .iter()
            .filter(move |r| now.saturating_sub(r.at) <= window)
    }
}

/// Bound the change from `current` toward `clamped` by the per-tick rate
/// limits.
fn rate_limit(spec: &WorkloadSpec, current: u32, clamped: u32) -> u32 {
    let behavior = &spec.behavior;
    if clamped > current {
        let by_percent = (current as u64 * behavior.scale_up_percent as u64).div_ceil(100);
        let max_up = by_percent.max(behavior.scale_up_min_step as u64);
        let ceiling = (current as u64 + max_up).min(u32::MAX as u64) as u32;
        clamped.min(ceiling)
    } else if clamped < current {
        let max_down = (current as u64 * behavior.scale_down_percent as u64 / 100) as u32;
        clamped.max(current.saturating_sub(max_down))
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_state::{InstanceInfo, MetricSample};

    const NOW: Timestamp = 10_000;

    fn test_spec(min: u32, max: u32, target: u32) -> WorkloadSpec {
        WorkloadSpec::new("web", "registry.local/web:1", min, max, target)
    }

    /// `current` ready instances, each sampled at `utilization` `age` seconds ago.
    fn observed(current: u32, utilization: f64, age: u64) -> ObservedState {
        let instances: Vec<InstanceInfo> = (0..current)
            .map(|i| InstanceInfo {
                id: format!("web-1-{i:05}"),
                revision: 1,
                ready: true,
                created_at: 1000,
            })
            .collect();
        let samples = instances
            .iter()
            .map(|i| MetricSample {
                instance_id: i.id.clone(),
                utilization_percent: utilization,
                timestamp: NOW - age,
            })
            .collect();
        ObservedState::from_instances("web", instances, samples, NOW)
    }

    fn scaler() -> Autoscaler {
        Autoscaler::new(Duration::from_secs(15))
    }

    #[test]
    fn scale_up_above_target() {
        let spec = test_spec(1, 100, 60);
        let decision = scaler().decide(&spec, &observed(10, 90.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(15));
        assert_eq!(decision.desired_replicas, 15);
        assert_eq!(decision.reason, ScaleReason::AboveTarget);
    }

    #[test]
    fn stabilization_holds_scale_down() {
        let spec = test_spec(1, 100, 60);
        let mut scaler = scaler();

        // Two minutes ago the recommendation was 15.
        let earlier = scaler.decide(&spec, &observed(10, 90.0, 0), NOW - 120);
        assert_eq!(earlier.desired_replicas, 15);

        let decision = scaler.decide(&spec, &observed(20, 30.0, 0), NOW);
        assert_eq!(decision.raw_replicas, Some(10));
        assert_eq!(decision.desired_replicas, 15);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn stabilization_window_expires() {
        let spec = test_spec(1, 100, 60);
        let mut scaler = scaler();

        scaler.decide(&spec, &observed(10, 90.0, 0), NOW - 301);
        let decision = scaler.decide(&spec, &observed(20, 30.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 10);
        assert_eq!(decision.reason, ScaleReason::BelowTarget);
    }

    #[test]
    fn scale_base_ignores_surge_instances() {
        let spec = test_spec(2, 10, 50);
        // three instances running, one of them surge over a scale of two
        let decision = scaler().decide_at_scale(&spec, &observed(3, 50.0, 0), 2, NOW);

        assert_eq!(decision.raw_replicas, Some(2));
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(decision.reason, ScaleReason::AtTarget);
    }

    #[test]
    fn clamp_to_max_is_at_bound() {
        let spec = test_spec(2, 10, 60);
        // 8 * 1200 / 60 = 160
        let decision = scaler().decide(&spec, &observed(8, 1200.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(160));
        assert_eq!(decision.desired_replicas, 10);
        assert_eq!(decision.reason, ScaleReason::AtBound);
    }

    #[test]
    fn clamp_to_min_is_at_bound() {
        let mut spec = test_spec(2, 10, 60);
        spec.behavior.scale_down_stabilization_secs = 0;
        let decision = scaler().decide(&spec, &observed(4, 6.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(1));
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(decision.reason, ScaleReason::AtBound);
    }

    #[test]
    fn at_target_keeps_current() {
        let spec = test_spec(1, 100, 60);
        for current in [1, 3, 7, 10, 33] {
            let decision = scaler().decide(&spec, &observed(current, 60.0, 0), NOW);
            assert_eq!(decision.raw_replicas, Some(current));
            assert_eq!(decision.desired_replicas, current);
            assert_eq!(decision.reason, ScaleReason::AtTarget);
        }
    }

    #[test]
    fn stale_samples_mean_no_metrics() {
        let spec = test_spec(1, 100, 60);
        // Samples 31s old with a 15s interval: all stale, content irrelevant.
        let decision = scaler().decide(&spec, &observed(6, 500.0, 31), NOW);

        assert_eq!(decision.reason, ScaleReason::NoMetrics);
        assert_eq!(decision.desired_replicas, 6);
        assert_eq!(decision.raw_replicas, None);
    }

    #[test]
    fn sample_at_freshness_edge_counts() {
        let spec = test_spec(1, 100, 60);
        let decision = scaler().decide(&spec, &observed(6, 90.0, 30), NOW);
        assert_eq!(decision.reason, ScaleReason::AboveTarget);
    }

    #[test]
    fn partial_samples_mean_no_metrics() {
        let spec = test_spec(1, 100, 60);
        let mut obs = observed(4, 90.0, 0);
        obs.metric_samples.truncate(3);

        let decision = scaler().decide(&spec, &obs, NOW);
        assert_eq!(decision.reason, ScaleReason::NoMetrics);
        assert_eq!(decision.desired_replicas, 4);
    }

    #[test]
    fn no_metrics_with_zero_replicas_moves_into_bounds() {
        let spec = test_spec(2, 10, 60);
        let decision = scaler().decide(&spec, &observed(0, 0.0, 0), NOW);
        assert_eq!(decision.reason, ScaleReason::NoMetrics);
        assert_eq!(decision.desired_replicas, 2);
    }

    #[test]
    fn scale_up_rate_limited_by_min_step() {
        let spec = test_spec(1, 100, 50);
        // raw = ceil(2 * 400 / 50) = 16; limit max(ceil(2 * 100%), 4) = 4.
        let decision = scaler().decide(&spec, &observed(2, 400.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(16));
        assert_eq!(decision.desired_replicas, 6);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn scale_up_rate_limited_by_percent() {
        let mut spec = test_spec(1, 100, 50);
        spec.behavior.scale_up_percent = 50;
        spec.behavior.scale_up_min_step = 1;
        // raw = 40; 50% of 10 = 5.
        let decision = scaler().decide(&spec, &observed(10, 200.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 15);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn scale_down_rate_limited() {
        let mut spec = test_spec(1, 100, 60);
        spec.behavior.scale_down_percent = 50;
        spec.behavior.scale_down_stabilization_secs = 0;
        // raw = ceil(10 * 12 / 60) = 2; 50% of 10 = 5.
        let decision = scaler().decide(&spec, &observed(10, 12.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(2));
        assert_eq!(decision.desired_replicas, 5);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn scale_down_disabled_by_zero_percent() {
        let mut spec = test_spec(1, 100, 60);
        spec.behavior.scale_down_percent = 0;
        spec.behavior.scale_down_stabilization_secs = 0;
        let decision = scaler().decide(&spec, &observed(10, 12.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 10);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn scale_up_stabilization_uses_window_minimum() {
        let mut spec = test_spec(1, 100, 60);
        spec.behavior.scale_up_stabilization_secs = 60;
        let mut scaler = scaler();

        // 30s ago: raw 12 from 10 replicas.
        scaler.decide(&spec, &observed(10, 72.0, 0), NOW - 30);
        let decision = scaler.decide(&spec, &observed(10, 90.0, 0), NOW);

        assert_eq!(decision.raw_replicas, Some(15));
        assert_eq!(decision.desired_replicas, 12);
        assert_eq!(decision.reason, ScaleReason::RateLimited);
    }

    #[test]
    fn zero_up_window_ignores_earlier_recommendations() {
        let spec = test_spec(1, 100, 50);
        let mut scaler = scaler();
        scaler.decide(&spec, &observed(2, 100.0, 0), NOW);

        let decision = scaler.decide(&spec, &observed(4, 100.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 8);
        assert_eq!(decision.reason, ScaleReason::AboveTarget);
    }

    #[test]
    fn fixed_size_mode_is_constant() {
        let spec = test_spec(5, 5, 60);
        let mut scaler = scaler();
        for utilization in [1.0, 60.0, 300.0] {
            let decision = scaler.decide(&spec, &observed(5, utilization, 0), NOW);
            assert_eq!(decision.desired_replicas, 5);
        }
    }

    #[test]
    fn shrunk_bounds_override_stabilization() {
        let mut spec = test_spec(1, 100, 60);
        let mut scaler = scaler();
        scaler.decide(&spec, &observed(10, 90.0, 0), NOW - 60);

        spec.max_replicas = 8;
        let decision = scaler.decide(&spec, &observed(20, 30.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 8);
        assert_eq!(decision.reason, ScaleReason::AtBound);
    }

    #[test]
    fn decision_always_within_bounds() {
        let mut spec = test_spec(3, 12, 50);
        spec.behavior.scale_down_percent = 20;
        let mut scaler = scaler();
        let mut t = NOW;
        for current in [0, 1, 2, 3, 7, 12, 15, 40] {
            for utilization in [0.0, 10.0, 49.9, 50.0, 50.1, 99.0, 1000.0] {
                t += 15;
                let decision = scaler.decide(&spec, &observed(current, utilization, 0), t);
                assert!(
                    (3..=12).contains(&decision.desired_replicas),
                    "current={current} util={utilization} -> {decision:?}"
                );
            }
        }
    }

    #[test]
    fn reset_clears_history() {
        let spec = test_spec(1, 100, 60);
        let mut scaler = scaler();
        scaler.decide(&spec, &observed(10, 90.0, 0), NOW - 60);
        scaler.reset();

        let decision = scaler.decide(&spec, &observed(20, 30.0, 0), NOW);
        assert_eq!(decision.desired_replicas, 10);
    }
}
