//! converge-api: REST API for Converge.
//!
//! Every response uses the `{success, data, error}` envelope. Invalid
//! specs are rejected synchronously with `422`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/workloads` | List workload specs |
//! | POST | `/api/v1/workloads` | Create or update a workload spec |
//! | GET | `/api/v1/workloads/{name}` | Get a workload spec |
//! | DELETE | `/api/v1/workloads/{name}` | Delete a workload |
//! | POST | `/api/v1/workloads/{name}/scale` | Set or clear explicit replicas |
//! | GET | `/api/v1/workloads/{name}/status` | Control-loop status |
//! | GET | `/api/v1/workloads/{name}/revisions` | Revision history |
//! | GET | `/api/v1/workloads/{name}/rollouts` | Active and archived rollouts |
//! | POST | `/api/v1/workloads/{name}/rollout/pause` | Pause the active rollout |
//! | POST | `/api/v1/workloads/{name}/rollout/resume` | Resume a paused rollout |
//! | POST | `/api/v1/workloads/{name}/rollout/rollback` | Roll back |
//! | GET | `/api/v1/status` | Status of every workload |

pub mod handlers;
pub mod rollout_handlers;

use axum::Router;
use axum::routing::{get, post};

use converge_controller::ControllerHandle;
use converge_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: ControllerHandle,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/workloads",
            get(handlers::list_workloads).post(handlers::apply_workload),
        )
        .route(
            "/workloads/{name}",
            get(handlers::get_workload).delete(handlers::delete_workload),
        )
        .route("/workloads/{name}/scale", post(handlers::scale_workload))
        .route("/workloads/{name}/status", get(handlers::workload_status))
        .route(
            "/workloads/{name}/revisions",
            get(rollout_handlers::list_revisions),
        )
        .route(
            "/workloads/{name}/rollouts",
            get(rollout_handlers::list_rollouts),
        )
        .route(
            "/workloads/{name}/rollout/pause",
            post(rollout_handlers::pause_rollout),
        )
        .route(
            "/workloads/{name}/rollout/resume",
            post(rollout_handlers::resume_rollout),
        )
        .route(
            "/workloads/{name}/rollout/rollback",
            post(rollout_handlers::rollback_rollout),
        )
        .route("/status", get(handlers::list_status))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
