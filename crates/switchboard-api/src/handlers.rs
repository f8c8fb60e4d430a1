//! Route handler functions for all API endpoints.
//!
//! Handlers translate between HTTP and the dispatcher. They hold no state of
//! their own.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use switchboard_action::dispatcher::HealthReport;
use switchboard_action::{
    ActionRequest, ActionSchema, FailureKind, JobSummary, SubmitOutcome, SyncResult,
};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

/// Body of a 202 reply: the job handle plus its current summary.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAcceptedResponse {
    pub accepted: bool,
    /// Set when an existing job was returned instead of a new one.
    pub deduplicated: bool,
    #[serde(flatten)]
    pub job: JobSummary,
}

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub actions: &'static [ActionSchema],
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// =============================================================================
// Actions
// =============================================================================

/// POST /actions - submit an action.
///
/// 200 with the result for sync actions, 202 with a job handle for async
/// ones. A failed sync action answers 502, or 504 when it timed out, with the
/// same result body.
pub async fn submit_action(
    State(state): State<AppState>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    match state.dispatcher.submit(request).await {
        SubmitOutcome::Completed(result) => Ok(sync_response(result)),
        SubmitOutcome::Queued { job, deduplicated } => {
            debug!(job_id = %job.job_id, deduplicated, "Job handle returned");
            let body = JobAcceptedResponse {
                accepted: true,
                deduplicated,
                job,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        SubmitOutcome::Rejected(err) => Err(err.into()),
    }
}

fn sync_response(result: SyncResult) -> Response {
    let status = match result.failure {
        None => StatusCode::OK,
        Some(FailureKind::Executor) => StatusCode::BAD_GATEWAY,
        Some(FailureKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
    };
    if status != StatusCode::OK {
        warn!(action = %result.action, status = status.as_u16(), "Sync action failed");
    }
    (status, Json(result)).into_response()
}

/// GET /actions - registered action schemas.
pub async fn list_actions(State(state): State<AppState>) -> Json<ActionsResponse> {
    Json(ActionsResponse {
        actions: state.dispatcher.actions(),
    })
}

// =============================================================================
// Jobs
// =============================================================================

/// GET /jobs/{id} - job status, progress and result.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSummary>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Malformed job id: {}", id)))?;
    let job = state.dispatcher.job(id)?;
    Ok(Json(job))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - executor reachability and job count.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.dispatcher.health().await;
    Json(HealthResponse {
        report,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
