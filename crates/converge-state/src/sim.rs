//! In-process simulated cluster.
//!
//! `SimBackend` implements both [`OrchestrationBackend`] and
//! [`MetricsSource`] over a shared in-memory instance table. It backs
//! `convergd run` and every control-loop test: readiness, utilization and
//! backend failures are all scriptable, and the clock can be driven by hand.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::backend::{BackendError, BackendResult, Clock, MetricsSource, OrchestrationBackend};
use crate::store::epoch_secs;
use crate::types::{InstanceId, InstanceInfo, Revision, Timestamp};

/// How newly created instances become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessMode {
    /// Ready as soon as they exist.
    Immediate,
    /// Ready once the given number of seconds has elapsed since creation.
    After(u64),
    /// Only [`SimBackend::set_ready`] flips readiness.
    Manual,
}

#[derive(Debug, Clone, Copy)]
enum SimClock {
    System,
    Manual(Timestamp),
}

/// Counters of backend calls, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCalls {
    pub creates: u64,
    pub deletes: u64,
    pub lists: u64,
    pub samples: u64,
}

#[derive(Debug, Clone)]
struct SimInstance {
    workload: String,
    revision: Revision,
    created_at: Timestamp,
    /// Explicit readiness; overrides the readiness mode when set.
    ready_override: Option<bool>,
}

#[derive(Debug)]
struct SimCluster {
    clock: SimClock,
    readiness: ReadinessMode,
    instances: BTreeMap<InstanceId, SimInstance>,
    next_serial: u64,
    workload_utilization: HashMap<String, f64>,
    instance_utilization: HashMap<InstanceId, f64>,
    metrics_unavailable: HashSet<String>,
    fail_creates_remaining: u32,
    create_failure: Option<String>,
    list_failure: Option<String>,
    create_delay: Option<Duration>,
    calls: SimCalls,
}

impl SimCluster {
    fn now(&self) -> Timestamp {
        match self.clock {
            SimClock::System => epoch_secs(),
            SimClock::Manual(t) => t,
        }
    }

    fn is_ready(&self, instance: &SimInstance) -> bool {
        if let Some(ready) = instance.ready_override {
            return ready;
        }
        match self.readiness {
            ReadinessMode::Immediate => true,
            ReadinessMode::After(secs) => self.now() >= instance.created_at + secs,
            ReadinessMode::Manual => false,
        }
    }

    fn info(&self, id: &str, instance: &SimInstance) -> InstanceInfo {
        InstanceInfo {
            id: id.to_string(),
            revision: instance.revision,
            ready: self.is_ready(instance),
            created_at: instance.created_at,
        }
    }

    fn insert(&mut self, workload: &str, revision: Revision, created_at: Timestamp) -> InstanceId {
        self.next_serial += 1;
        let id = format!("{workload}-{revision}-{:05}", self.next_serial);
        self.instances.insert(
            id.clone(),
            SimInstance {
                workload: workload.to_string(),
                revision,
                created_at,
                ready_override: None,
            },
        );
        id
    }
}

/// Cloneable handle to a simulated cluster. Clones share state.
#[derive(Debug, Clone)]
pub struct SimBackend {
    inner: Arc<Mutex<SimCluster>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// Wall-clock simulation with instantly ready instances.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimCluster {
                clock: SimClock::System,
                readiness: ReadinessMode::Immediate,
                instances: BTreeMap::new(),
                next_serial: 0,
                workload_utilization: HashMap::new(),
                instance_utilization: HashMap::new(),
                metrics_unavailable: HashSet::new(),
                fail_creates_remaining: 0,
                create_failure: None,
                list_failure: None,
                create_delay: None,
                calls: SimCalls::default(),
            })),
        }
    }

    /// Simulation whose clock only moves through [`SimBackend::advance`].
    pub fn with_manual_clock(start: Timestamp) -> Self {
        let sim = Self::new();
        sim.lock().clock = SimClock::Manual(start);
        sim
    }

    // A poisoned lock only means a test thread panicked mid-update; the
    // table itself is still usable.
    fn lock(&self) -> MutexGuard<'_, SimCluster> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now(&self) -> Timestamp {
        self.lock().now()
    }

    /// Move a manual clock forward. No-op on a wall clock.
    pub fn advance(&self, secs: u64) {
        let mut cluster = self.lock();
        if let SimClock::Manual(t) = cluster.clock {
            cluster.clock = SimClock::Manual(t + secs);
        }
    }

    pub fn set_readiness(&self, mode: ReadinessMode) {
        self.lock().readiness = mode;
    }

    /// Force an instance ready or not-ready regardless of the mode.
    pub fn set_ready(&self, instance_id: &str, ready: bool) -> bool {
        match self.lock().instances.get_mut(instance_id) {
            Some(instance) => {
                instance.ready_override = Some(ready);
                true
            }
            None => false,
        }
    }

    /// Mark every instance of `workload` at `revision` ready or not-ready.
    pub fn set_revision_ready(&self, workload: &str, revision: Revision, ready: bool) {
        let mut cluster = self.lock();
        for instance in cluster.instances.values_mut() {
            if instance.workload == workload && instance.revision == revision {
                instance.ready_override = Some(ready);
            }
        }
    }

    /// Utilization reported for every instance of `workload` without an
    /// instance-level override.
    pub fn set_utilization(&self, workload: &str, percent: f64) {
        self.lock()
            .workload_utilization
            .insert(workload.to_string(), percent);
    }

    pub fn set_instance_utilization(&self, instance_id: &str, percent: f64) {
        self.lock()
            .instance_utilization
            .insert(instance_id.to_string(), percent);
    }

    /// Make every sample for `workload` come back empty.
    pub fn set_metrics_unavailable(&self, workload: &str, unavailable: bool) {
        let mut cluster = self.lock();
        if unavailable {
            cluster.metrics_unavailable.insert(workload.to_string());
        } else {
            cluster.metrics_unavailable.remove(workload);
        }
    }

    /// Reject the next `n` create calls.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().fail_creates_remaining = n;
    }

    /// Reject every create call with `message` until cleared with `None`.
    pub fn set_create_failure(&self, message: Option<&str>) {
        self.lock().create_failure = message.map(str::to_string);
    }

    /// Reject every list call with `message` until cleared with `None`.
    pub fn set_list_failure(&self, message: Option<&str>) {
        self.lock().list_failure = message.map(str::to_string);
    }

    /// Delay each create call by `delay` before it takes effect.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        self.lock().create_delay = delay;
    }

    /// Place an instance directly, bypassing failure injection and counters.
    pub fn seed_instance(&self, workload: &str, revision: Revision, ready: bool) -> InstanceId {
        let mut cluster = self.lock();
        let now = cluster.now();
        let id = cluster.insert(workload, revision, now);
        if let Some(instance) = cluster.instances.get_mut(&id) {
            instance.ready_override = Some(ready);
        }
        id
    }

    /// Snapshot of a workload's instances, ordered by id.
    pub fn instances(&self, workload: &str) -> Vec<InstanceInfo> {
        let cluster = self.lock();
        cluster
            .instances
            .iter()
            .filter(|(_, i)| i.workload == workload)
            .map(|(id, i)| cluster.info(id, i))
            .collect()
    }

    pub fn instance_count(&self, workload: &str) -> usize {
        self.lock()
            .instances
            .values()
            .filter(|i| i.workload == workload)
            .count()
    }

    /// Instance count per revision for `workload`.
    pub fn revision_counts(&self, workload: &str) -> BTreeMap<Revision, u32> {
        let mut counts = BTreeMap::new();
        for instance in self.lock().instances.values() {
            if instance.workload == workload {
                *counts.entry(instance.revision).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn calls(&self) -> SimCalls {
        self.lock().calls
    }
}

impl Clock for SimBackend {
    fn now(&self) -> Timestamp {
        self.lock().now()
    }
}

impl OrchestrationBackend for SimBackend {
    async fn create_instance(&self, workload: &str, revision: Revision) -> BackendResult<InstanceId> {
        let delay = {
            let mut cluster = self.lock();
            cluster.calls.creates += 1;
            if let Some(message) = &cluster.create_failure {
                return Err(BackendError::Unavailable(message.clone()));
            }
            if cluster.fail_creates_remaining > 0 {
                cluster.fail_creates_remaining -= 1;
                return Err(BackendError::Unavailable("injected create failure".to_string()));
            }
            cluster.create_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut cluster = self.lock();
        let now = cluster.now();
        let id = cluster.insert(workload, revision, now);
        debug!(workload, revision, instance = %id, "sim: instance created");
        Ok(id)
    }

    async fn delete_instance(&self, instance_id: &str) -> BackendResult<()> {
        let mut cluster = self.lock();
        cluster.calls.deletes += 1;
        if cluster.instances.remove(instance_id).is_some() {
            cluster.instance_utilization.remove(instance_id);
            debug!(instance = instance_id, "sim: instance deleted");
        }
        Ok(())
    }

    async fn list_instances(&self, workload: &str) -> BackendResult<Vec<InstanceInfo>> {
        let mut cluster = self.lock();
        cluster.calls.lists += 1;
        if let Some(message) = &cluster.list_failure {
            return Err(BackendError::Unavailable(message.clone()));
        }
        Ok(cluster
            .instances
            .iter()
            .filter(|(_, i)| i.workload == workload)
            .map(|(id, i)| cluster.info(id, i))
            .collect())
    }
}

impl MetricsSource for SimBackend {
    async fn sample_utilization(&self, instance_id: &str) -> Option<f64> {
        let mut cluster = self.lock();
        cluster.calls.samples += 1;
        let workload = cluster.instances.get(instance_id)?.workload.clone();
        if cluster.metrics_unavailable.contains(&workload) {
            return None;
        }
        cluster
            .instance_utilization
            .get(instance_id)
            .or_else(|| cluster.workload_utilization.get(&workload))
            .copied()
    }
}
