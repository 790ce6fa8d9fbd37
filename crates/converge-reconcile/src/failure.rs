//! Consecutive-failure tracking and the `Degraded` status.

use tracing::{info, warn};

use crate::reconciler::ReconcileOutcome;

/// Counts consecutive ticks whose instance creation failed.
///
/// Degraded is informational only; the control loop keeps attempting.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    workload: String,
    threshold: u32,
    consecutive: u32,
    last_error: Option<String>,
}

impl FailureTracker {
    pub fn new(workload: &str, threshold: u32) -> Self {
        Self {
            workload: workload.to_string(),
            threshold: threshold.max(1),
            consecutive: 0,
            last_error: None,
        }
    }

    /// Fold one tick's outcome in.
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        if outcome.create_failed() {
            self.record_failure(outcome.error.as_ref().map(ToString::to_string));
        } else {
            self.record_success();
        }
    }

    pub fn record_failure(&mut self, error: Option<String>) {
        self.consecutive += 1;
        self.last_error = error;
        if self.consecutive == self.threshold {
            warn!(
                workload = %self.workload,
                consecutive = self.consecutive,
                error = self.last_error.as_deref().unwrap_or("unknown"),
                "workload degraded"
            );
        }
    }

    pub fn record_success(&mut self) {
        if self.is_degraded() {
            info!(workload = %self.workload, "workload recovered");
        }
        self.consecutive = 0;
        self.last_error = None;
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
