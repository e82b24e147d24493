//! Admin API.
//!
//! Operator and webhook endpoints; served on the admin bind only, never on
//! the gate listeners.

pub mod error;
pub mod fleet;
pub mod health;
pub mod pipeline;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use shipgate_core::{Orchestrator, TrafficGate};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub gate: Arc<TrafficGate>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Triggers
        .route("/hooks/source", post(pipeline::source_event))
        .route("/pipeline/trigger", post(pipeline::manual_trigger))
        // Runs
        .route("/pipeline/status", get(pipeline::status))
        .route("/pipeline/runs", get(pipeline::list_runs))
        .route("/pipeline/runs/{id}", get(pipeline::get_run))
        .route("/pipeline/runs/{id}/cancel", post(pipeline::cancel_run))
        .route("/pipeline/runs/{id}/rollback", post(pipeline::rollback_run))
        .route("/pipeline/reconcile", post(pipeline::reconcile))
        // Fleet and gate
        .route("/fleet", get(fleet::fleet_status))
        .route("/gate/secret", post(fleet::rotate_secret))
        .route("/metrics", get(fleet::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
