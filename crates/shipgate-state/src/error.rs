//! Error types for shipgate-state

use thiserror::Error;

/// Errors produced by artifact stores and run ledgers.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under this digest
    #[error("object not found: {digest}")]
    NotFound { digest: String },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// No ledger entry for this run
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Ledger entry already exists for this run
    #[error("run already recorded: {run_id}")]
    DuplicateRun { run_id: String },

    /// Backend refused the operation (unreachable, read-only, quota)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
