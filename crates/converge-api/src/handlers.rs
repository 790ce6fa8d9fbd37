//! REST API handlers for workload specs, scaling and status.
//!
//! Specs go straight to the `StateStore`; status comes from the control
//! loops through the `ControllerHandle`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use converge_state::{StateError, WorkloadSpec, WorkloadStatus};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// `InvalidSpec` is the caller's fault; everything else is ours.
pub(crate) fn state_error(e: &StateError) -> Response {
    let status = match e {
        StateError::InvalidSpec(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn not_found(name: &str) -> Response {
    error_response(&format!("workload {name} not found"), StatusCode::NOT_FOUND)
}

// ── Workloads ──────────────────────────────────────────────────

/// GET /api/v1/workloads
pub async fn list_workloads(State(state): State<ApiState>) -> Response {
    match state.store.list_specs() {
        Ok(specs) => ApiResponse::ok(specs).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/workloads/{name}
pub async fn get_workload(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.store.get_spec(&name) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => not_found(&name),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/workloads
///
/// Creates or updates. Validation happens here, synchronously; the
/// revision is bumped when the template changed.
pub async fn apply_workload(
    State(state): State<ApiState>,
    Json(spec): Json<WorkloadSpec>,
) -> Response {
    let existed = match state.store.get_spec(&spec.name) {
        Ok(found) => found.is_some(),
        Err(e) => return state_error(&e),
    };
    match state.store.apply_spec(&spec) {
        Ok(stored) => {
            state.controller.request_sync();
            let status = if existed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/workloads/{name}
pub async fn delete_workload(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.store.delete_spec(&name) {
        Ok(true) => {
            state.controller.request_sync();
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => not_found(&name),
        Err(e) => state_error(&e),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Scale request body. `null` hands the workload back to the autoscaler.
#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: Option<u32>,
}

/// POST /api/v1/workloads/{name}/scale
pub async fn scale_workload(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> Response {
    let mut spec = match state.store.get_spec(&name) {
        Ok(Some(spec)) => spec,
        Ok(None) => return not_found(&name),
        Err(e) => return state_error(&e),
    };
    spec.replicas = req.replicas;
    match state.store.apply_spec(&spec) {
        Ok(stored) => ApiResponse::ok(stored).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn list_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.controller.list().await).into_response()
}

/// GET /api/v1/workloads/{name}/status
///
/// A stored workload whose loop has not ticked yet reports as pending.
pub async fn workload_status(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    if let Some(status) = state.controller.status(&name).await {
        return ApiResponse::ok(status).into_response();
    }
    match state.store.get_spec(&name) {
        Ok(Some(spec)) => {
            ApiResponse::ok(WorkloadStatus::pending(&spec.name, spec.revision)).into_response()
        }
        Ok(None) => not_found(&name),
        Err(e) => state_error(&e),
    }
}
