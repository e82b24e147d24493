//! Structured observability hooks for pipeline, deployment and gate events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for lifecycle events: trigger, transition, publish,
//!   member outcome, gate decision, scaling decision
//!
//! Events are emitted at `info!` level unless noted. Use `RUST_LOG` to
//! filter; set `SHIPGATE_LOG_FORMAT=json` on the binaries for JSON lines.

use tracing::{debug, info, warn};

/// RAII guard that enters a run-scoped tracing span.
///
/// Only hold this in synchronous sections; async drivers should
/// `.instrument(run_span(..))` instead.
///
/// ```ignore
/// let _span = RunSpan::enter("4b6c…");
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Span carrying `run_id` for every event emitted while a run is driven.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("shipgate.run", run_id = %run_id)
}

/// Emit event: a trigger started a new run.
pub fn emit_run_started(run_id: &str, source: &str) {
    info!(event = "run.started", run_id = %run_id, source = %source);
}

/// Emit event: a trigger was parked in the pending slot.
pub fn emit_run_queued(source: &str, superseded: Option<&str>) {
    info!(
        event = "run.queued",
        source = %source,
        superseded = superseded.unwrap_or("none"),
    );
}

pub fn emit_trigger_ignored(branch: &str, reason: &dyn std::fmt::Display) {
    debug!(event = "trigger.ignored", branch = %branch, reason = %reason);
}

pub fn emit_transition(run_id: &str, from: &str, to: &str) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to);
}

pub fn emit_artifact_published(run_id: &str, version: &str, size: u64) {
    info!(
        event = "artifact.published",
        run_id = %run_id,
        version = %version,
        size = size,
    );
}

/// Emit event: one member finished (or abandoned) its rollout step.
pub fn emit_member_outcome(deployment_id: &str, member: &str, outcome: &str) {
    info!(
        event = "deploy.member",
        deployment_id = %deployment_id,
        member = %member,
        outcome = %outcome,
    );
}

pub fn emit_deployment_finished(deployment_id: &str, status: &str, targets: usize, duration_ms: u64) {
    info!(
        event = "deploy.finished",
        deployment_id = %deployment_id,
        status = %status,
        targets = targets,
        duration_ms = duration_ms,
    );
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(run_id: &str, state: &str, duration_ms: u64, failure: Option<&str>) {
    if let Some(failure) = failure {
        warn!(
            event = "run.finished",
            run_id = %run_id,
            state = %state,
            duration_ms = duration_ms,
            failure = %failure,
        );
    } else {
        info!(
            event = "run.finished",
            run_id = %run_id,
            state = %state,
            duration_ms = duration_ms,
        );
    }
}

/// Emit event: gate answered one request (debug level, per request).
pub fn emit_gate_decision(tier: &str, protocol: &str, path: &str, outcome: &str, status: u16) {
    debug!(
        event = "gate.decision",
        tier = %tier,
        protocol = %protocol,
        path = %path,
        outcome = %outcome,
        status = status,
    );
}

pub fn emit_policy_replaced(header_name: &str, edge_gating: bool) {
    info!(event = "gate.policy_replaced", header_name = %header_name, edge_gating = edge_gating);
}

pub fn emit_scaling_decision(current: usize, desired: usize, driven_by: Option<&str>) {
    info!(
        event = "fleet.scaling",
        current = current,
        desired = desired,
        driven_by = driven_by.unwrap_or("none"),
    );
}

/// Emit event: run ledger write failed (warning level). The run proceeds.
pub fn emit_ledger_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.ledger_error", run_id = %run_id, error = %error);
}
