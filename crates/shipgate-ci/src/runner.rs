//! Single-stage execution.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use shipgate_core::BuildError;
use tokio::process::Command;

use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage_name: String,

    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Last few lines of stderr, for failure messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

pub struct StageRunner;

impl StageRunner {
    /// Run one stage in `workdir` with extra environment variables.
    ///
    /// A non-zero exit is a successful execution with a failing result; only
    /// spawn failures and timeouts are errors. Timed-out processes are killed.
    pub async fn execute_stage(
        config: &StageConfig,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<StageResult, BuildError> {
        let start = Instant::now();

        let Some((exe, args)) = config.command.split_first() else {
            return Err(BuildError::Reported(format!(
                "stage {} has an empty command",
                config.name
            )));
        };

        let child = Command::new(exe)
            .args(args)
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| BuildError::Timeout {
                stage: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let result = StageResult {
            stage_name: "bundle".to_string(),
            exit_code: 2,
            stdout: String::new(),
            stderr: "one\ntwo\nthree\nfour".to_string(),
            duration_ms: 5,
        };
        assert!(!result.passed());
        assert_eq!(result.stderr_tail(2), "three\nfour");
        assert_eq!(result.stderr_tail(10), "one\ntwo\nthree\nfour");
    }

    #[tokio::test]
    async fn execute_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::new("echo", vec!["echo".into(), "hello".into()], 60);
        let result = StageRunner::execute_stage(&config, dir.path(), &[])
            .await
            .unwrap();
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn failing_command_is_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::new("false", vec!["false".into()], 60);
        let result = StageRunner::execute_stage(&config, dir.path(), &[])
            .await
            .unwrap();
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn env_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::shell("env", "printf %s \"$SHIPGATE_COMMIT\"", 60);
        let env = vec![("SHIPGATE_COMMIT".to_string(), "3f2a9c1".to_string())];
        let result = StageRunner::execute_stage(&config, dir.path(), &env)
            .await
            .unwrap();
        assert_eq!(result.stdout, "3f2a9c1");
    }

    #[tokio::test]
    async fn slow_stage_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::new("sleep", vec!["sleep".into(), "5".into()], 1);
        let err = StageRunner::execute_stage(&config, dir.path(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::new("nothing", Vec::new(), 60);
        assert!(StageRunner::execute_stage(&config, dir.path(), &[])
            .await
            .is_err());
    }
}
