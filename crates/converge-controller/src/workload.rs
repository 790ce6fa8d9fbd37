//! Per-workload control loop.
//!
//! A `WorkloadLoop` owns everything one workload needs between ticks: the
//! autoscaler history, the failure count, the active rollout and its health
//! gate. It runs as its own tokio task and is the only writer of that
//! state, so ticks for one workload never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use converge_autoscale::Autoscaler;
use converge_core::ControllerSettings;
use converge_observer::Observer;
use converge_reconcile::{FailureTracker, ReconcileAction, Reconciler, desired_target, reconcile};
use converge_rollout::{EventSink, GateVerdict, HealthGate, Rollout, RolloutAction, RolloutError};
use converge_state::{
    Clock, MetricsSource, ObservedState, OrchestrationBackend, Revision, RolloutPhase,
    RolloutState, ScaleReason, ScalingDecision, StateStore, Timestamp, WorkloadSpec,
    WorkloadStatus,
};

use crate::command::{Command, CommandRequest};
use crate::error::{ControllerError, ControllerResult};

/// Latest status per workload, shared with the controller handle.
pub type StatusMap = Arc<RwLock<HashMap<String, WorkloadStatus>>>;

pub struct WorkloadLoop<B, M> {
    name: String,
    store: StateStore,
    observer: Observer<B, M>,
    autoscaler: Autoscaler,
    reconciler: Reconciler<B>,
    failures: FailureTracker,
    rollout: Option<Rollout>,
    gate: Option<HealthGate>,
    /// Revision the instances settle on outside a rollout. `None` until the
    /// first tick has looked at the backend.
    revision: Option<Revision>,
    /// Last target handed to the reconciler or rollout. Scaling decisions
    /// during a rollout are relative to this, not to the surged count.
    scale: Option<u32>,
    sink: Arc<dyn EventSink>,
    tick_interval: Duration,
    metrics_stale: bool,
    status: WorkloadStatus,
    statuses: StatusMap,
}

impl<B, M> WorkloadLoop<B, M>
where
    B: OrchestrationBackend,
    M: MetricsSource,
{
    pub fn new(
        name: &str,
        store: StateStore,
        observer: Observer<B, M>,
        backend: Arc<B>,
        settings: &ControllerSettings,
        sink: Arc<dyn EventSink>,
        statuses: StatusMap,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            observer,
            autoscaler: Autoscaler::new(settings.sampling_interval),
            reconciler: Reconciler::new(backend, settings.call_timeout),
            failures: FailureTracker::new(name, settings.degraded_threshold),
            rollout: None,
            gate: None,
            revision: None,
            scale: None,
            sink,
            tick_interval: settings.tick_interval,
            metrics_stale: false,
            status: WorkloadStatus::pending(name, 0),
            statuses,
        }
    }

    pub fn status(&self) -> &WorkloadStatus {
        &self.status
    }

    /// The rollout in flight, if any.
    pub fn rollout_state(&self) -> Option<&RolloutState> {
        self.rollout.as_ref().map(Rollout::state)
    }

    /// Tick every `tick_interval` and serve commands in between until
    /// `shutdown` fires.
    pub async fn run(
        mut self,
        clock: Arc<dyn Clock>,
        mut commands: mpsc::Receiver<CommandRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(workload = %self.name, interval = ?self.tick_interval, "control loop starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(clock.now()).await;
                }
                Some(request) = commands.recv() => {
                    let result = self.handle(request.command, clock.now());
                    self.publish().await;
                    if request.reply.send(result).is_err() {
                        debug!(workload = %self.name, "command caller went away");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(workload = %self.name, "control loop shutting down");
                    break;
                }
            }
        }
    }

    /// One observe, decide, act pass. Never fails; problems end up in the
    /// published status.
    pub async fn tick(&mut self, now: Timestamp) -> WorkloadStatus {
        let spec = match self.store.get_spec(&self.name) {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                debug!(workload = %self.name, "spec gone, skipping tick");
                return self.status.clone();
            }
            Err(e) => {
                warn!(workload = %self.name, error = %e, "failed to load spec");
                self.status.last_error = Some(e.to_string());
                self.status.last_tick_at = Some(now);
                self.publish().await;
                return self.status.clone();
            }
        };

        let observed = self.observer.refresh(&self.name, now).await;
        let decision = match self.scale.filter(|_| self.rollout.is_some()) {
            Some(scale) => self.autoscaler.decide_at_scale(&spec, &observed, scale, now),
            None => self.autoscaler.decide(&spec, &observed, now),
        };
        self.note_metrics(&decision);
        let target = desired_target(&spec, &decision);
        self.scale = Some(target);

        self.track_revision(&spec, &observed, now);
        self.check_health(&spec, &observed, now);

        let mut rollout_error = None;
        let mut converged = false;
        let action = match self.rollout.as_mut() {
            Some(rollout) => match rollout.step(&spec, target, &observed.instances, now) {
                Ok(RolloutAction::Create { revision, count }) => {
                    ReconcileAction::CreateInstances { count, revision }
                }
                Ok(RolloutAction::Delete { victims }) => ReconcileAction::DeleteInstances {
                    count: victims.len() as u32,
                    victims,
                },
                Ok(RolloutAction::Hold) => ReconcileAction::NoAction,
                Ok(RolloutAction::Converged) => {
                    converged = true;
                    ReconcileAction::NoAction
                }
                Err(e) => {
                    warn!(workload = %self.name, error = %e, "rollout holding");
                    rollout_error = Some(e.to_string());
                    ReconcileAction::NoAction
                }
            },
            None => reconcile(&spec, &observed, &decision),
        };
        if converged {
            self.finish_rollout(now);
        }

        let outcome = self.reconciler.apply(&self.name, &action).await;
        self.failures.record(&outcome);

        let last_error = outcome
            .error
            .as_ref()
            .map(ToString::to_string)
            .or(rollout_error);
        self.update_status(&spec, &observed, decision, target, last_error, now);
        self.publish().await;
        self.status.clone()
    }

    /// Apply an operator command. Only called between ticks.
    pub fn handle(&mut self, command: Command, now: Timestamp) -> ControllerResult<RolloutState> {
        debug!(workload = %self.name, ?command, "handling command");
        match command {
            Command::Pause => {
                let rollout = self.active_rollout()?;
                rollout.pause(now)?;
                Ok(rollout.state().clone())
            }
            Command::Resume => {
                let rollout = self.active_rollout()?;
                rollout.resume(now)?;
                let state = rollout.state().clone();
                if let Some(gate) = self.gate.as_mut() {
                    gate.reset();
                }
                Ok(state)
            }
            Command::Rollback { to_revision } => {
                if let Some(rollout) = &self.rollout {
                    let active = rollout.state().old_revision;
                    if let Some(requested) = to_revision.filter(|r| *r != active) {
                        return Err(ControllerError::RollbackTarget {
                            name: self.name.clone(),
                            requested,
                            active,
                        });
                    }
                    return self.roll_back(now);
                }
                let Some(to) = to_revision else {
                    return Err(ControllerError::NoActiveRollout(self.name.clone()));
                };
                let spec = self.store.rollback_spec(&self.name, to)?;
                let from = self.revision.unwrap_or(spec.revision.saturating_sub(1));
                self.begin_rollout(&spec, from, now);
                self.rollout_state()
                    .cloned()
                    .ok_or_else(|| ControllerError::NoActiveRollout(self.name.clone()))
            }
        }
    }

    fn active_rollout(&mut self) -> ControllerResult<&mut Rollout> {
        self.rollout
            .as_mut()
            .ok_or_else(|| ControllerError::NoActiveRollout(self.name.clone()))
    }

    /// Reverse the active rollout onto a fresh revision carrying its old
    /// template.
    fn roll_back(&mut self, now: Timestamp) -> ControllerResult<RolloutState> {
        let rollout = self
            .rollout
            .as_mut()
            .ok_or_else(|| ControllerError::NoActiveRollout(self.name.clone()))?;
        let phase = rollout.phase();
        if !matches!(phase, RolloutPhase::Progressing | RolloutPhase::Paused) {
            return Err(RolloutError::InvalidTransition {
                from: phase,
                to: RolloutPhase::RolledBack,
            }
            .into());
        }

        let spec = self.store.rollback_spec(&self.name, rollout.state().old_revision)?;
        rollout.rollback(spec.revision, now)?;
        Ok(rollout.state().clone())
    }

    /// Start a rollout when the spec's revision moved away from what the
    /// instances run, or supersede the active one on a newer edit.
    fn track_revision(&mut self, spec: &WorkloadSpec, observed: &ObservedState, now: Timestamp) {
        if let Some(rollout) = &self.rollout {
            if spec.revision > rollout.state().latest_revision() {
                let from = rollout.state().create_revision();
                info!(
                    workload = %self.name,
                    abandoned = rollout.state().latest_revision(),
                    revision = spec.revision,
                    "template changed mid-rollout, superseding"
                );
                self.archive(now);
                self.begin_rollout(spec, from, now);
            }
            return;
        }

        let settled = match self.revision {
            Some(revision) => revision,
            // First look: adopt whatever revision the running instances
            // disagree with the spec on.
            None => observed
                .instances
                .iter()
                .map(|i| i.revision)
                .filter(|r| *r != spec.revision)
                .max()
                .unwrap_or(spec.revision),
        };
        if settled == spec.revision {
            self.revision = Some(spec.revision);
        } else {
            self.begin_rollout(spec, settled, now);
        }
    }

    fn begin_rollout(&mut self, spec: &WorkloadSpec, from: Revision, now: Timestamp) {
        self.rollout = Some(Rollout::start(
            &self.name,
            from,
            spec.revision,
            now,
            Arc::clone(&self.sink),
        ));
        self.gate = Some(HealthGate::new(&spec.rollout));
    }

    fn check_health(&mut self, spec: &WorkloadSpec, observed: &ObservedState, now: Timestamp) {
        let (Some(rollout), Some(gate)) = (self.rollout.as_mut(), self.gate.as_mut()) else {
            return;
        };
        if rollout.phase() != RolloutPhase::Progressing {
            return;
        }
        if gate.observe(rollout.state(), &observed.instances, now) != GateVerdict::Tripped {
            return;
        }

        if spec.rollout.auto_rollback {
            if let Err(e) = self.roll_back(now) {
                warn!(workload = %self.name, error = %e, "automatic rollback failed");
            }
        } else if let Err(e) = rollout.pause(now) {
            warn!(workload = %self.name, error = %e, "automatic pause failed");
        }
    }

    fn finish_rollout(&mut self, now: Timestamp) {
        if let Some(rollout) = &self.rollout {
            self.revision = Some(rollout.state().latest_revision());
        }
        self.archive(now);
        self.gate = None;
    }

    /// Move the active rollout into the archive.
    fn archive(&mut self, now: Timestamp) {
        let Some(rollout) = self.rollout.take() else {
            return;
        };
        let mut state = rollout.state().clone();
        state.finished_at.get_or_insert(now);
        if let Err(e) = self.store.archive_rollout(&state) {
            warn!(workload = %self.name, error = %e, "failed to archive rollout");
        }
    }

    fn note_metrics(&mut self, decision: &ScalingDecision) {
        let stale = decision.reason == ScaleReason::NoMetrics;
        if stale && !self.metrics_stale {
            warn!(
                workload = %self.name,
                holding = decision.desired_replicas,
                "no fresh metrics, holding replica count"
            );
        } else if !stale && self.metrics_stale {
            info!(workload = %self.name, "metrics recovered");
        }
        self.metrics_stale = stale;
    }

    fn update_status(
        &mut self,
        spec: &WorkloadSpec,
        observed: &ObservedState,
        decision: ScalingDecision,
        target: u32,
        last_error: Option<String>,
        now: Timestamp,
    ) {
        self.status = WorkloadStatus {
            name: self.name.clone(),
            revision: spec.revision,
            current_replicas: observed.current_replicas,
            ready_replicas: observed.ready_replicas,
            desired_replicas: target,
            last_decision: Some(decision),
            rollout: self.rollout_state().cloned(),
            degraded: self.failures.is_degraded(),
            consecutive_failures: self.failures.consecutive_failures(),
            last_error,
            last_tick_at: Some(now),
        };
    }

    async fn publish(&mut self) {
        self.status.rollout = self.rollout_state().cloned();
        self.statuses
            .write()
            .await
            .insert(self.name.clone(), self.status.clone());
    }
}
