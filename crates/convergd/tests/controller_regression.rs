//! Controller regression tests.
//!
//! Wires the REST API, the state store, the controller and the simulated
//! cluster together the way `convergd run` does, then drives workloads
//! through the API only.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use converge_api::{ApiState, build_router};
use converge_controller::{Controller, ControllerHandle};
use converge_core::ControllerSettings;
use converge_state::{ReadinessMode, SimBackend, StateStore};

struct Stack {
    sim: SimBackend,
    handle: ControllerHandle,
    router: Router,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Stack {
    fn start() -> Self {
        let sim = SimBackend::with_manual_clock(50_000);
        let store = StateStore::open_in_memory().unwrap();
        let backend = Arc::new(sim.clone());
        let settings = ControllerSettings {
            tick_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let controller = Controller::new(store.clone(), Arc::clone(&backend), backend, settings)
            .with_clock(Arc::new(sim.clone()));
        let handle = controller.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(shutdown_rx));
        let router = build_router(ApiState {
            store,
            controller: handle.clone(),
        });
        Self {
            sim,
            handle,
            router,
            shutdown_tx,
            task,
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap();
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn workload(min: u32, max: u32, image: &str) -> Value {
    json!({
        "name": "web",
        "min_replicas": min,
        "max_replicas": max,
        "target_utilization_percent": 50,
        "template": { "image": image }
    })
}

#[tokio::test]
async fn workload_lifecycle_through_api() {
    let owned = Stack::start();
    let stack = &owned;

    let (status, _) = stack
        .call("POST", "/api/v1/workloads", Some(workload(2, 6, "web:1")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    eventually("bootstrap to min replicas", || async move {
        stack.sim.instance_count("web") == 2
    })
    .await;

    // load drives it up to max_replicas
    stack.sim.set_utilization("web", 100.0);
    eventually("scale up to max", || async move { stack.sim.instance_count("web") == 6 }).await;
    eventually("status reports the bound", || async move {
        let (_, body) = stack.call("GET", "/api/v1/workloads/web/status", None).await;
        body["data"]["last_decision"]["reason"] == "at_bound"
            && body["data"]["current_replicas"] == 6
    })
    .await;

    // a template change rolls every instance over
    let (status, body) = stack
        .call("POST", "/api/v1/workloads", Some(workload(2, 6, "web:2")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revision"], 2);
    eventually("rollout to revision 2", || async move {
        let counts = stack.sim.revision_counts("web");
        counts.len() == 1 && counts.get(&2) == Some(&6)
    })
    .await;
    eventually("rollout archived", || async move {
        let (_, body) = stack.call("GET", "/api/v1/workloads/web/rollouts", None).await;
        body["data"]["history"]
            .as_array()
            .is_some_and(|h| h.len() == 1 && h[0]["phase"] == "complete")
    })
    .await;

    let (status, _) = stack.call("DELETE", "/api/v1/workloads/web", None).await;
    assert_eq!(status, StatusCode::OK);
    eventually("loop stopped", || async move { stack.handle.status("web").await.is_none() }).await;

    owned.stop().await;
}

#[tokio::test]
async fn pause_resume_and_rollback_through_api() {
    let owned = Stack::start();
    let stack = &owned;
    stack
        .call("POST", "/api/v1/workloads", Some(workload(3, 3, "web:1")))
        .await;
    eventually("bootstrap", || async move { stack.sim.instance_count("web") == 3 }).await;

    // revision 2 never becomes ready
    stack.sim.set_revision_ready("web", 1, true);
    stack.sim.set_readiness(ReadinessMode::Manual);
    stack
        .call("POST", "/api/v1/workloads", Some(workload(3, 3, "web:2")))
        .await;
    eventually("rollout started", || async move {
        stack
            .handle
            .status("web")
            .await
            .is_some_and(|s| s.rollout.is_some())
    })
    .await;

    let (status, body) = stack
        .call("POST", "/api/v1/workloads/web/rollout/pause", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "paused");

    let (status, _) = stack
        .call("POST", "/api/v1/workloads/web/rollout/pause", None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = stack
        .call("POST", "/api/v1/workloads/web/rollout/resume", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "progressing");

    let (status, body) = stack
        .call("POST", "/api/v1/workloads/web/rollout/rollback", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "rolled_back");
    assert_eq!(body["data"]["rollback_revision"], 3);

    eventually("unready revision drained", || async move {
        let counts = stack.sim.revision_counts("web");
        !counts.contains_key(&2) && counts.values().sum::<u32>() == 3
    })
    .await;

    let (_, body) = stack.call("GET", "/api/v1/workloads/web", None).await;
    assert_eq!(body["data"]["revision"], 3);
    assert_eq!(body["data"]["template"]["image"], "web:1");

    owned.stop().await;
}

#[tokio::test]
async fn repeated_create_failures_degrade_then_recover() {
    let owned = Stack::start();
    let stack = &owned;
    stack.sim.set_create_failure(Some("quota exceeded"));
    stack
        .call("POST", "/api/v1/workloads", Some(workload(1, 3, "web:1")))
        .await;

    eventually("degraded", || async move {
        let (_, body) = stack.call("GET", "/api/v1/workloads/web/status", None).await;
        body["data"]["degraded"] == true
    })
    .await;
    let (_, body) = stack.call("GET", "/api/v1/status", None).await;
    assert!(body["data"][0]["last_error"]
        .as_str()
        .unwrap()
        .contains("quota exceeded"));

    stack.sim.set_create_failure(None);
    eventually("recovered", || async move {
        let (_, body) = stack.call("GET", "/api/v1/workloads/web/status", None).await;
        body["data"]["degraded"] == false && stack.sim.instance_count("web") == 1
    })
    .await;

    owned.stop().await;
}

#[tokio::test]
async fn invalid_spec_never_reaches_the_controller() {
    let owned = Stack::start();
    let stack = &owned;
    let (status, body) = stack
        .call("POST", "/api/v1/workloads", Some(workload(4, 2, "web:1")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(stack.handle.list().await.is_empty());
    assert_eq!(stack.sim.instance_count("web"), 0);

    owned.stop().await;
}
