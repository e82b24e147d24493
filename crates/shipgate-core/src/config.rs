//! Stack configuration loaded from TOML.
//!
//! One structure drives the whole stack: the pipeline, both gate tiers, the
//! fleet with its scaling policies, and the feature toggles that reshape the
//! generated rule sets. Defaults mirror a single-branch production stack.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fleet::scaling::ScalingPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub pipeline: PipelineConfig,
    pub gate: GateConfig,
    pub fleet: FleetConfig,
    pub features: Features,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Only pushes to this branch trigger runs.
    pub branch: String,
    pub build_timeout_secs: u64,
    /// Deadline for one member to apply and report healthy.
    pub member_timeout_secs: u64,
    pub health_poll_interval_ms: u64,
    /// Roll back to the last good artifact when a deployment fails.
    pub auto_rollback: bool,
    pub artifact_dir: PathBuf,
    pub build: BuildSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            build_timeout_secs: 900,
            member_timeout_secs: 300,
            health_poll_interval_ms: 1000,
            auto_rollback: false,
            artifact_dir: PathBuf::from(".shipgate/artifacts"),
            build: BuildSettings::default(),
        }
    }
}

/// Shell stages that turn a checkout into one artifact file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub workdir: PathBuf,
    /// File the stages leave behind, relative to `workdir`.
    pub output: PathBuf,
    pub stages: Vec<StageSettings>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            output: PathBuf::from("dist/bundle.tar.gz"),
            stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSettings {
    pub name: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_stage_timeout() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Header the edge injects and the origin listener requires.
    pub header_name: String,
    /// Pre-shared value; usually supplied through the environment.
    pub header_value: String,
    pub edge_domain: Option<String>,
    pub origin_domain: Option<String>,
    /// Negotiate gzip/br at the edge.
    pub compress: bool,
    pub redirect_status: u16,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Secret".to_string(),
            header_value: String::new(),
            edge_domain: None,
            origin_domain: None,
            compress: true,
            redirect_status: 301,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub availability_zones: Vec<String>,
    pub policies: Vec<ScalingPolicy>,
    pub evaluation_interval_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 4,
            availability_zones: vec!["zone-a".to_string(), "zone-b".to_string()],
            policies: vec![
                ScalingPolicy::requests_per_minute(60.0),
                ScalingPolicy::cpu_utilization(75.0),
            ],
            evaluation_interval_secs: 60,
        }
    }
}

/// Toggles that change generated policy, never the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub edge_gating: bool,
    pub auto_scaling: bool,
    pub multi_az: bool,
    pub https_redirect: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            edge_gating: true,
            auto_scaling: true,
            multi_az: true,
            https_redirect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub admin_bind: String,
    pub edge_bind: String,
    pub origin_http_bind: String,
    pub origin_https_bind: String,
    /// Let `X-Forwarded-Proto` decide the viewer protocol on the edge
    /// listener. Enable only behind a TLS terminator that sets it.
    pub trust_forwarded_proto: bool,
    /// Members registered at startup.
    pub members: Vec<MemberConfig>,
    /// Standby members the autoscaler may bring into the fleet.
    pub spare_members: Vec<MemberConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            admin_bind: "127.0.0.1:7070".to_string(),
            edge_bind: "127.0.0.1:8080".to_string(),
            origin_http_bind: "127.0.0.1:8081".to_string(),
            origin_https_bind: "127.0.0.1:8082".to_string(),
            trust_forwarded_proto: false,
            members: Vec::new(),
            spare_members: Vec::new(),
        }
    }
}

impl StackConfig {
    /// Read and parse a TOML file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Collect every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.pipeline.branch.trim().is_empty() {
            problems.push("pipeline.branch must not be empty".to_string());
        }
        if self.pipeline.build_timeout_secs == 0 {
            problems.push("pipeline.build_timeout_secs must be positive".to_string());
        }
        if self.pipeline.member_timeout_secs == 0 {
            problems.push("pipeline.member_timeout_secs must be positive".to_string());
        }
        if self.pipeline.health_poll_interval_ms == 0 {
            problems.push("pipeline.health_poll_interval_ms must be positive".to_string());
        }
        for stage in &self.pipeline.build.stages {
            if stage.command.is_empty() {
                problems.push(format!("build stage {} has an empty command", stage.name));
            }
        }

        if self.gate.header_name.trim().is_empty() {
            problems.push("gate.header_name must not be empty".to_string());
        }
        if self.features.edge_gating && self.gate.header_value.is_empty() {
            problems.push("gate.header_value must be set when edge_gating is enabled".to_string());
        }
        if !(300..400).contains(&self.gate.redirect_status) {
            problems.push(format!(
                "gate.redirect_status {} is not a redirect",
                self.gate.redirect_status
            ));
        }

        if self.fleet.min_size > self.fleet.max_size {
            problems.push(format!(
                "fleet.min_size {} exceeds fleet.max_size {}",
                self.fleet.min_size, self.fleet.max_size
            ));
        }
        if self.fleet.availability_zones.is_empty() {
            problems.push("fleet.availability_zones must list at least one zone".to_string());
        }
        if self.fleet.evaluation_interval_secs == 0 {
            problems.push("fleet.evaluation_interval_secs must be positive".to_string());
        }
        let mut names = HashSet::new();
        for policy in &self.fleet.policies {
            if policy.target <= 0.0 {
                problems.push(format!("policy {} has non-positive target", policy.name));
            }
            if !names.insert(policy.name.as_str()) {
                problems.push(format!("policy {} is defined twice", policy.name));
            }
        }

        let binds = [
            &self.daemon.admin_bind,
            &self.daemon.edge_bind,
            &self.daemon.origin_http_bind,
            &self.daemon.origin_https_bind,
        ];
        let mut seen = HashSet::new();
        for bind in binds {
            if !seen.insert(bind.as_str()) {
                problems.push(format!("listen address {} is used twice", bind));
            }
        }
        let mut ids = HashSet::new();
        for member in self.daemon.members.iter().chain(&self.daemon.spare_members) {
            if !ids.insert(member.id.as_str()) {
                problems.push(format!("member id {} is used twice", member.id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::scaling::ScalingMetric;

    const SAMPLE: &str = r#"
[pipeline]
branch = "release"
member_timeout_secs = 30
auto_rollback = true

[pipeline.build]
output = "target/site.tar"

[[pipeline.build.stages]]
name = "bundle"
command = ["make", "bundle"]

[gate]
header_value = "s3cr3t"

[fleet]
min_size = 2
max_size = 6

[[fleet.policies]]
name = "rpm"
metric = "requests_per_minute"
target = 120.0

[features]
multi_az = false

[[daemon.members]]
id = "i-0001"
url = "http://10.0.0.11:9000"
zone = "zone-a"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.pipeline.branch, "release");
        assert_eq!(config.pipeline.build_timeout_secs, 900);
        assert!(config.pipeline.auto_rollback);
        assert_eq!(config.pipeline.build.stages[0].timeout_secs, 600);
        assert!(config.pipeline.build.stages[0].enabled);
        assert_eq!(config.pipeline.build.workdir, PathBuf::from("."));
        assert_eq!(config.gate.header_name, "X-Secret");
        assert_eq!(config.fleet.policies.len(), 1);
        assert_eq!(config.fleet.policies[0].metric, ScalingMetric::RequestsPerMinute);
        assert_eq!(config.fleet.policies[0].cooldown_secs, 300);
        assert!(!config.features.multi_az);
        assert!(config.features.edge_gating);
        assert_eq!(config.daemon.members[0].zone.as_deref(), Some("zone-a"));
        assert!(!config.daemon.trust_forwarded_proto);
        config.validate().unwrap();
    }

    #[test]
    fn default_policies_match_stack() {
        let fleet = FleetConfig::default();
        assert_eq!(fleet.policies[0].target, 60.0);
        assert_eq!(fleet.policies[1].target, 75.0);
    }

    #[test]
    fn validate_collects_all_problems() {
        let mut config = StackConfig::default();
        config.fleet.min_size = 5;
        config.fleet.max_size = 2;
        config.pipeline.member_timeout_secs = 0;
        config.daemon.edge_bind = config.daemon.admin_bind.clone();

        match config.validate() {
            Err(ConfigError::Invalid { problems }) => {
                assert_eq!(problems.len(), 4, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("header_value")));
                assert!(problems.iter().any(|p| p.contains("min_size")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn secret_optional_without_edge_gating() {
        let mut config = StackConfig::default();
        config.features.edge_gating = false;
        config.validate().unwrap();
    }

    #[test]
    fn load_reports_missing_file() {
        let err = StackConfig::load("/nonexistent/shipgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipgate.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = StackConfig::load(&path).unwrap();
        assert_eq!(config.fleet.max_size, 6);
    }
}
