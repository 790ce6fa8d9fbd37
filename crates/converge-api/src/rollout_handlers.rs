//! REST API handlers for revisions and rollouts.
//!
//! Pause, resume and rollback are forwarded to the workload's control loop
//! and answered once the loop has applied them between ticks.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use converge_controller::{ControllerError, ControllerResult};
use converge_state::{Revision, RolloutState};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, state_error};

fn controller_error(e: &ControllerError) -> Response {
    let status = match e {
        ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
        ControllerError::NoActiveRollout(_)
        | ControllerError::RollbackTarget { .. }
        | ControllerError::Rollout(_) => StatusCode::CONFLICT,
        ControllerError::LoopStopped(_) => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::State(e) => return state_error(e),
    };
    error_response(&e.to_string(), status)
}

fn command_response(result: ControllerResult<RolloutState>) -> Response {
    match result {
        Ok(rollout) => ApiResponse::ok(rollout).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// Active rollout plus the archive.
#[derive(Debug, Serialize)]
pub struct RolloutHistory {
    pub active: Option<RolloutState>,
    pub history: Vec<RolloutState>,
}

/// Optional rollback body.
#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    pub to_revision: Option<Revision>,
}

/// GET /api/v1/workloads/{name}/revisions
pub async fn list_revisions(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    if let Err(e) = state.store.require_spec(&name) {
        return state_error(&e);
    }
    match state.store.list_revisions(&name) {
        Ok(revisions) => ApiResponse::ok(revisions).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/workloads/{name}/rollouts
pub async fn list_rollouts(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    if let Err(e) = state.store.require_spec(&name) {
        return state_error(&e);
    }
    let history = match state.store.list_rollouts(&name) {
        Ok(history) => history,
        Err(e) => return state_error(&e),
    };
    let active = state
        .controller
        .status(&name)
        .await
        .and_then(|s| s.rollout);
    ApiResponse::ok(RolloutHistory { active, history }).into_response()
}

/// POST /api/v1/workloads/{name}/rollout/pause
pub async fn pause_rollout(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    info!(workload = %name, "pause requested");
    command_response(state.controller.pause(&name).await)
}

/// POST /api/v1/workloads/{name}/rollout/resume
pub async fn resume_rollout(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    info!(workload = %name, "resume requested");
    command_response(state.controller.resume(&name).await)
}

/// POST /api/v1/workloads/{name}/rollout/rollback
///
/// An empty body reverses the active rollout; `{"to_revision": n}`
/// re-applies revision `n`'s template when no rollout is active.
pub async fn rollback_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let req: RollbackRequest = if body.is_empty() {
        RollbackRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(
                    &format!("invalid rollback request: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        }
    };
    info!(workload = %name, to_revision = ?req.to_revision, "rollback requested");
    command_response(state.controller.rollback(&name, req.to_revision).await)
}
