//! Domain-level error taxonomy for Shipgate.

use serde::{Deserialize, Serialize};
use shipgate_state::{RunId, StorageError};

use crate::config::ConfigError;
use crate::domain::deployment::MemberId;
use crate::domain::run::RunState;

/// Why a run ended in `Failed` or `Cancelled`.
///
/// Stored on the run for operators; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("build failed: {message}")]
    Build { message: String },

    #[error("publish failed: {message}")]
    Publish { message: String },

    #[error("member {member} failed to apply artifact: {message}")]
    MemberApply { member: MemberId, message: String },

    #[error("member {member} did not report healthy before the deployment timeout")]
    MemberHealthTimeout { member: MemberId },

    #[error("fleet snapshot was empty")]
    NoTargets,

    #[error("cancelled by {by}")]
    Cancelled { by: String },
}

/// Shipgate orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("invalid transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunState,
        to: RunState,
    },

    #[error("run {run_id} cannot be cancelled while {state}")]
    NotCancellable { run_id: RunId, state: RunState },

    #[error("run {run_id} cannot be rolled back while {state}")]
    NotRollbackable { run_id: RunId, state: RunState },

    #[error("no succeeded run to roll back to")]
    NoPriorSuccess,

    #[error("no current artifact: no run has succeeded yet")]
    NoCurrentArtifact,

    /// Another run, rollback or reconciliation holds the in-flight slot.
    #[error("orchestrator busy: {holder}")]
    Busy { holder: String },

    #[error("rollback of run {run_id} failed: {reason}")]
    RollbackFailed { run_id: RunId, reason: FailureReason },

    /// The task driving a rollback or reconciliation ended abnormally.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for Shipgate orchestration operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
