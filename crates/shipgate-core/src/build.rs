//! Build step seam.
//!
//! The orchestrator only needs bytes out of a source reference; how they are
//! produced (shell stages, a remote build service, a test script) sits behind
//! [`Builder`].

use async_trait::async_trait;

use crate::domain::SourceRef;

/// Bytes produced by a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("stage {stage} exited with code {code}: {stderr}")]
    NonZeroExit {
        stage: String,
        code: i32,
        stderr: String,
    },

    #[error("stage {stage} timed out after {timeout_secs}s")]
    Timeout { stage: String, timeout_secs: u64 },

    /// The build tool itself reported a failure.
    #[error("{0}")]
    Reported(String),

    #[error("build io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, source: &SourceRef) -> Result<BuildOutput, BuildError>;
}
