//! Trigger and run endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use shipgate_core::{Artifact, Deployment, PipelineRun, SourceEvent, SourceRef, TriggerOutcome};
use shipgate_state::RunId;

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTrigger {
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    pub by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub idle: bool,
    pub active_run: Option<PipelineRun>,
    pub pending: Option<SourceRef>,
    pub current_artifact: Option<Artifact>,
}

fn trigger_status(outcome: &TriggerOutcome) -> StatusCode {
    match outcome {
        TriggerOutcome::Ignored { .. } => StatusCode::OK,
        TriggerOutcome::Started { .. } | TriggerOutcome::Queued { .. } => StatusCode::ACCEPTED,
    }
}

/// POST /hooks/source
/// Source-control webhook; non-matching events are ignored, not queued.
pub async fn source_event(
    State(state): State<AppState>,
    Json(event): Json<SourceEvent>,
) -> (StatusCode, Json<TriggerOutcome>) {
    tracing::debug!(branch = %event.branch, "source event received");
    let outcome = state.orchestrator.handle_event(&event);
    (trigger_status(&outcome), Json(outcome))
}

/// POST /pipeline/trigger
/// Operator trigger; bypasses the branch filter.
pub async fn manual_trigger(
    State(state): State<AppState>,
    Json(req): Json<ManualTrigger>,
) -> ApiResult<(StatusCode, Json<TriggerOutcome>)> {
    if req.commit.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(ApiError::BadRequest("commit must not be empty".to_string()));
    }
    let source = SourceRef::Manual {
        requested_by: req.requested_by.unwrap_or_else(|| "operator".to_string()),
        commit: req.commit,
    };
    tracing::info!(source = %source, "manual trigger");
    let outcome = state.orchestrator.trigger(source);
    Ok((trigger_status(&outcome), Json(outcome)))
}

/// GET /pipeline/status
pub async fn status(State(state): State<AppState>) -> Json<PipelineStatus> {
    let orchestrator = &state.orchestrator;
    Json(PipelineStatus {
        idle: orchestrator.is_idle(),
        active_run: orchestrator.active_run(),
        pending: orchestrator.pending(),
        current_artifact: orchestrator.current_artifact(),
    })
}

/// GET /pipeline/runs
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<PipelineRun>> {
    Json(state.orchestrator.runs())
}

/// GET /pipeline/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<PipelineRun>> {
    state
        .orchestrator
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {} not found", id)))
}

/// POST /pipeline/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
    Query(params): Query<CancelParams>,
) -> ApiResult<Json<PipelineRun>> {
    let by = params.by.unwrap_or_else(|| "operator".to_string());
    tracing::info!(run_id = %id, by = %by, "cancel requested");
    Ok(Json(state.orchestrator.cancel(id, &by).await?))
}

/// POST /pipeline/runs/{id}/rollback
/// Re-deploys the last good artifact over a failed run.
pub async fn rollback_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!(run_id = %id, "rollback requested");
    Ok(Json(state.orchestrator.rollback(id).await?))
}

/// POST /pipeline/reconcile
/// Brings members that missed a deployment up to the current artifact.
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<Json<Deployment>> {
    Ok(Json(state.orchestrator.reconcile().await?))
}
