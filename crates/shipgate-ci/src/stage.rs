//! Build stage definitions.

use serde::{Deserialize, Serialize};
use shipgate_core::config::StageSettings;

/// Configuration for one build stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds. Zero disables the timeout.
    pub timeout_secs: u64,

    /// Whether this stage runs.
    pub enabled: bool,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            enabled: true,
        }
    }

    /// `sh -c <script>` stage.
    pub fn shell(name: impl Into<String>, script: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.into()],
            timeout_secs,
        )
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<&StageSettings> for StageConfig {
    fn from(settings: &StageSettings) -> Self {
        Self {
            name: settings.name.clone(),
            command: settings.command.clone(),
            timeout_secs: settings.timeout_secs,
            enabled: settings.enabled,
        }
    }
}
