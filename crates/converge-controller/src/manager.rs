//! Controller: keeps one control loop running per stored workload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use converge_core::ControllerSettings;
use converge_observer::Observer;
use converge_rollout::{EventSink, LogSink};
use converge_state::{
    Clock, MetricsSource, OrchestrationBackend, Revision, RolloutState, StateStore, SystemClock,
    WorkloadSpec, WorkloadStatus,
};

use crate::command::{Command, CommandRequest};
use crate::error::{ControllerError, ControllerResult};
use crate::workload::{StatusMap, WorkloadLoop};

const COMMAND_QUEUE: usize = 16;

/// Running loop state.
struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// What a [`Controller::sync`] pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

/// Cloneable, non-generic access to loop status and commands.
#[derive(Clone, Default)]
pub struct ControllerHandle {
    statuses: StatusMap,
    commands: Arc<RwLock<HashMap<String, mpsc::Sender<CommandRequest>>>>,
    sync: Arc<Notify>,
}

impl ControllerHandle {
    pub async fn status(&self, name: &str) -> Option<WorkloadStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    /// Every published status, ordered by workload name.
    pub async fn list(&self) -> Vec<WorkloadStatus> {
        let mut all: Vec<_> = self.statuses.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn pause(&self, name: &str) -> ControllerResult<RolloutState> {
        self.send(name, Command::Pause).await
    }

    pub async fn resume(&self, name: &str) -> ControllerResult<RolloutState> {
        self.send(name, Command::Resume).await
    }

    pub async fn rollback(
        &self,
        name: &str,
        to_revision: Option<Revision>,
    ) -> ControllerResult<RolloutState> {
        self.send(name, Command::Rollback { to_revision }).await
    }

    /// Ask the controller to pick up spec changes without waiting for its
    /// next periodic sync.
    pub fn request_sync(&self) {
        self.sync.notify_one();
    }

    async fn send(&self, name: &str, command: Command) -> ControllerResult<RolloutState> {
        let tx = self
            .commands
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;

        let (reply, rx) = oneshot::channel();
        tx.send(CommandRequest { command, reply })
            .await
            .map_err(|_| ControllerError::LoopStopped(name.to_string()))?;
        rx.await
            .map_err(|_| ControllerError::LoopStopped(name.to_string()))?
    }
}

/// Owns the per-workload loops and the shared observer.
pub struct Controller<B, M> {
    store: StateStore,
    backend: Arc<B>,
    observer: Observer<B, M>,
    settings: ControllerSettings,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    loops: HashMap<String, LoopSlot>,
    handle: ControllerHandle,
}

impl<B, M> Controller<B, M>
where
    B: OrchestrationBackend,
    M: MetricsSource,
{
    pub fn new(
        store: StateStore,
        backend: Arc<B>,
        metrics: Arc<M>,
        settings: ControllerSettings,
    ) -> Self {
        let observer = Observer::new(Arc::clone(&backend), metrics, &settings);
        Self {
            store,
            backend,
            observer,
            settings,
            clock: Arc::new(SystemClock),
            sink: Arc::new(LogSink),
            loops: HashMap::new(),
            handle: ControllerHandle::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where rollout phase transitions go. Defaults to the tracing log.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Workloads with a running loop, sorted.
    pub fn active_loops(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loops.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start loops for new specs, stop loops whose spec was deleted, and
    /// restart any loop whose task ended unexpectedly.
    pub async fn sync(&mut self) -> ControllerResult<SyncReport> {
        let specs = self.store.list_specs()?;
        let wanted: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let mut report = SyncReport::default();

        let gone: Vec<String> = self
            .loops
            .keys()
            .filter(|name| !wanted.contains(name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            self.stop_loop(&name).await;
            self.observer.forget(&name).await;
            self.handle.statuses.write().await.remove(&name);
            report.stopped.push(name);
        }

        for spec in &specs {
            let dead = self
                .loops
                .get(&spec.name)
                .is_some_and(|slot| slot.handle.is_finished());
            if dead {
                warn!(workload = %spec.name, "control loop ended unexpectedly, restarting");
                self.loops.remove(&spec.name);
            }
            if !self.loops.contains_key(&spec.name) {
                self.start_loop(spec).await;
                report.started.push(spec.name.clone());
            }
        }

        if !report.started.is_empty() || !report.stopped.is_empty() {
            debug!(started = ?report.started, stopped = ?report.stopped, "controller synced");
        }
        Ok(report)
    }

    async fn start_loop(&mut self, spec: &WorkloadSpec) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        self.handle
            .statuses
            .write()
            .await
            .entry(spec.name.clone())
            .or_insert_with(|| WorkloadStatus::pending(&spec.name, spec.revision));
        self.handle
            .commands
            .write()
            .await
            .insert(spec.name.clone(), command_tx);

        let workload = WorkloadLoop::new(
            &spec.name,
            self.store.clone(),
            self.observer.clone(),
            Arc::clone(&self.backend),
            &self.settings,
            Arc::clone(&self.sink),
            Arc::clone(&self.handle.statuses),
        );
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(workload.run(clock, command_rx, shutdown_rx));

        self.loops.insert(
            spec.name.clone(),
            LoopSlot {
                handle,
                shutdown_tx,
            },
        );
        info!(workload = %spec.name, revision = spec.revision, "control loop started");
    }

    /// Signal a loop and wait for it to finish its current tick.
    async fn stop_loop(&mut self, name: &str) {
        self.handle.commands.write().await.remove(name);
        if let Some(slot) = self.loops.remove(name) {
            let _ = slot.shutdown_tx.send(true);
            if let Err(e) = slot.handle.await {
                error!(workload = %name, error = %e, "control loop task failed");
            }
            info!(workload = %name, "control loop stopped");
        }
    }

    /// Stop every loop (for graceful shutdown).
    pub async fn stop_all(&mut self) {
        let names: Vec<String> = self.loops.keys().cloned().collect();
        for name in names {
            self.stop_loop(&name).await;
        }
        info!("all control loops stopped");
    }

    /// Sync on every tick interval or when asked through the handle, until
    /// `shutdown` fires; then stop all loops.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let sync = Arc::clone(&self.handle.sync);
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        info!(interval = ?self.settings.tick_interval, "controller running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = sync.notified() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = self.sync().await {
                error!(error = %e, "controller sync failed");
            }
        }
        self.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use converge_state::SimBackend;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            tick_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn controller(sim: &SimBackend, store: &StateStore) -> Controller<SimBackend, SimBackend> {
        let backend = Arc::new(sim.clone());
        Controller::new(store.clone(), Arc::clone(&backend), backend, settings())
            .with_clock(Arc::new(sim.clone()))
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn sync_starts_and_stops_loops() {
        let sim = SimBackend::with_manual_clock(1_000);
        let store = StateStore::open_in_memory().unwrap();
        store
            .apply_spec(&WorkloadSpec::new("web", "registry.local/web:1", 2, 5, 50))
            .unwrap();
        store
            .apply_spec(&WorkloadSpec::new("api", "registry.local/api:1", 1, 3, 50))
            .unwrap();

        let mut controller = controller(&sim, &store);
        let handle = controller.handle();

        let report = controller.sync().await.unwrap();
        assert_eq!(report.started.len(), 2);
        assert_eq!(controller.active_loops(), vec!["api", "web"]);

        wait_for(|| sim.instance_count("web") == 2 && sim.instance_count("api") == 1).await;
        let names: Vec<_> = handle.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["api", "web"]);

        // second pass is a no-op
        assert_eq!(controller.sync().await.unwrap(), SyncReport::default());

        store.delete_spec("api").unwrap();
        let report = controller.sync().await.unwrap();
        assert_eq!(report.stopped, vec!["api"]);
        assert!(handle.status("api").await.is_none());
        assert!(matches!(
            handle.pause("api").await,
            Err(ControllerError::NotFound(_))
        ));

        controller.stop_all().await;
        assert!(controller.active_loops().is_empty());
    }

    #[tokio::test]
    async fn commands_reach_the_loop() {
        let sim = SimBackend::with_manual_clock(1_000);
        let store = StateStore::open_in_memory().unwrap();
        store
            .apply_spec(&WorkloadSpec::new("web", "registry.local/web:1", 2, 2, 50))
            .unwrap();

        let mut controller = controller(&sim, &store);
        let handle = controller.handle();
        controller.sync().await.unwrap();
        wait_for(|| sim.instance_count("web") == 2).await;

        assert!(matches!(
            handle.resume("web").await,
            Err(ControllerError::NoActiveRollout(_))
        ));

        // Keep the new revision from ever becoming ready so the rollout
        // stays in flight.
        sim.set_revision_ready("web", 1, true);
        sim.set_readiness(converge_state::ReadinessMode::Manual);
        let mut spec = store.require_spec("web").unwrap();
        spec.template.image = "registry.local/web:2".to_string();
        store.apply_spec(&spec).unwrap();

        let status_handle = handle.clone();
        for _ in 0..200 {
            if status_handle
                .status("web")
                .await
                .is_some_and(|s| s.rollout.is_some())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let paused = handle.pause("web").await.unwrap();
        assert_eq!(paused.phase, converge_state::RolloutPhase::Paused);
        let rolled = handle.rollback("web", None).await.unwrap();
        assert_eq!(rolled.phase, converge_state::RolloutPhase::RolledBack);
        assert_eq!(rolled.rollback_revision, Some(3));

        controller.stop_all().await;
    }

    #[tokio::test]
    async fn run_stops_loops_on_shutdown() {
        let sim = SimBackend::with_manual_clock(1_000);
        let store = StateStore::open_in_memory().unwrap();
        store
            .apply_spec(&WorkloadSpec::new("web", "registry.local/web:1", 1, 1, 50))
            .unwrap();

        let controller = controller(&sim, &store);
        let handle = controller.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(shutdown_rx));

        handle.request_sync();
        wait_for(|| sim.instance_count("web") == 1).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
