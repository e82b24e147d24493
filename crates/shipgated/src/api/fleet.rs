//! Fleet, gate and metrics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use shipgate_core::fleet::MemberStatus;
use shipgate_core::metrics::{MetricsSnapshot, METRICS};

use crate::api::error::ApiResult;
use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct SecretRotation {
    pub value: String,
}

/// GET /fleet
pub async fn fleet_status(State(state): State<AppState>) -> Json<Vec<MemberStatus>> {
    Json(state.orchestrator.fleet().status())
}

/// POST /gate/secret
/// Swaps the whole gate policy for one carrying the new secret.
pub async fn rotate_secret(
    State(state): State<AppState>,
    Json(req): Json<SecretRotation>,
) -> ApiResult<StatusCode> {
    state.gate.rotate_secret(req.value)?;
    tracing::info!("gate secret rotated");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /metrics
pub async fn metrics() -> Json<MetricsSnapshot> {
    Json(METRICS.snapshot())
}
