//! Sequential command-stage builder.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use shipgate_core::config::BuildSettings;
use shipgate_core::{BuildError, BuildOutput, Builder, SourceRef};
use tracing::{info, warn};

use crate::runner::StageRunner;
use crate::stage::StageConfig;

/// Lines of stderr carried into a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs the configured stages in order, stopping at the first failure, then
/// reads the output file as the artifact bytes.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    workdir: PathBuf,
    output: PathBuf,
    stages: Vec<StageConfig>,
}

impl CommandBuilder {
    pub fn new(workdir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            output: output.into(),
            stages: Vec::new(),
        }
    }

    pub fn from_settings(settings: &BuildSettings) -> Self {
        let mut builder = Self::new(&settings.workdir, &settings.output);
        builder.stages = settings.stages.iter().map(StageConfig::from).collect();
        builder
    }

    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn output_path(&self) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            self.workdir.join(&self.output)
        }
    }

    fn env_for(source: &SourceRef) -> Vec<(String, String)> {
        let mut env = vec![("SHIPGATE_SOURCE".to_string(), source.to_string())];
        if let Some(commit) = source.commit() {
            env.push(("SHIPGATE_COMMIT".to_string(), commit.to_string()));
        }
        if let SourceRef::Branch { branch, .. } = source {
            env.push(("SHIPGATE_BRANCH".to_string(), branch.clone()));
        }
        env
    }

    async fn read_output(path: &Path) -> Result<Vec<u8>, BuildError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BuildError::Reported(
                format!("build output {} was not produced", path.display()),
            )),
            Err(e) => Err(BuildError::Io(e)),
        }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, source: &SourceRef) -> Result<BuildOutput, BuildError> {
        let start = Instant::now();
        let env = Self::env_for(source);

        for stage in self.stages.iter().filter(|s| s.enabled) {
            let result = StageRunner::execute_stage(stage, &self.workdir, &env).await?;
            if !result.passed() {
                warn!(
                    stage = %stage.name,
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    "build stage failed"
                );
                return Err(BuildError::NonZeroExit {
                    stage: stage.name.clone(),
                    code: result.exit_code,
                    stderr: result.stderr_tail(STDERR_TAIL_LINES),
                });
            }
            info!(
                stage = %stage.name,
                duration_ms = result.duration_ms,
                "build stage passed"
            );
        }

        let bytes = Self::read_output(&self.output_path()).await?;
        Ok(BuildOutput {
            bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
