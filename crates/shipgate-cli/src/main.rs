//! Shipgate operator CLI
//!
//! ## Commands
//!
//! - `config check`: load and validate a stack configuration
//! - `gate explain`: trace how the gate policy treats one request
//! - `scaling plan`: evaluate the scaling policies against given metrics
//! - `build`: run the configured build stages and publish the output locally
//! - `admin`: talk to a running `shipgated`

mod admin;
mod explain;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use shipgate_ci::CommandBuilder;
use shipgate_core::fleet::scaling::{FleetMetrics, ScalingDecision, ScalingPlanner};
use shipgate_core::{
    Builder, GatePolicy, GateRequest, LogFormat, Protocol, SourceRef, StackConfig, Tier,
};
use shipgate_state::{ArtifactStore, FsArtifactStore};
use tracing::Level;

use admin::AdminClient;

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shipgate build/deploy pipeline and traffic gate", long_about = None)]
struct Cli {
    /// Stack configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SHIPGATE_CONFIG",
        default_value = "shipgate.toml"
    )]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format: text or json
    #[arg(long, global = true, env = "SHIPGATE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Gate policy operations
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },

    /// Scaling policy operations
    Scaling {
        #[command(subcommand)]
        action: ScalingAction,
    },

    /// Run the build stages and publish the artifact to a local store
    Build {
        /// Commit to build (recorded as a push to the configured branch)
        #[arg(long)]
        commit: Option<String>,

        /// Artifact store directory (default: pipeline.artifact_dir)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Operate a running daemon
    Admin {
        /// Admin API base URL
        #[arg(long, env = "SHIPGATE_ADMIN_URL", default_value = "http://127.0.0.1:7070")]
        url: String,

        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the configuration
    Check,
}

#[derive(Subcommand)]
enum GateAction {
    /// Show which rule and action a request would hit
    Explain {
        /// Tier the request enters at
        #[arg(long, value_enum, default_value = "origin")]
        tier: TierArg,

        /// Viewer protocol
        #[arg(long, value_enum, default_value = "https")]
        protocol: ProtocolArg,

        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value = "/")]
        path: String,

        /// Request header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Gate secret (default: gate.header_value)
        #[arg(long, env = "SHIPGATE_SECRET_VALUE", hide_env_values = true)]
        secret_value: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ScalingAction {
    /// Evaluate the configured policies once
    Plan {
        /// Current fleet size
        #[arg(long)]
        members: usize,

        /// Requests per minute across the fleet
        #[arg(long)]
        rpm: Option<u64>,

        /// Average CPU utilization, percent
        #[arg(long)]
        cpu: Option<f64>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Pipeline status: active run, pending trigger, current artifact
    Status,
    /// List runs
    Runs,
    /// Show one run
    Show { run_id: String },
    /// Trigger a manual run
    Trigger {
        #[arg(long)]
        commit: Option<String>,
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Cancel a queued or building run
    Cancel {
        run_id: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Re-deploy the last good artifact over a failed run
    Rollback { run_id: String },
    /// Bring stale members up to the current artifact
    Reconcile,
    /// Fleet member status
    Fleet,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    Edge,
    Origin,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Edge => Tier::Edge,
            TierArg::Origin => Tier::Origin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Http,
    Https,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Https => Protocol::Https,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    shipgate_core::init_tracing(cli.log_format, level);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Check => cmd_config_check(&cli.config),
        },
        Commands::Gate { action } => match action {
            GateAction::Explain {
                tier,
                protocol,
                host,
                path,
                headers,
                secret_value,
                json,
            } => {
                let mut req = GateRequest::new(protocol.into(), host, path);
                for (name, value) in headers {
                    req = req.with_header(name, value);
                }
                cmd_gate_explain(&cli.config, tier.into(), req, secret_value, json)
            }
        },
        Commands::Scaling { action } => match action {
            ScalingAction::Plan {
                members,
                rpm,
                cpu,
                json,
            } => cmd_scaling_plan(&cli.config, members, rpm, cpu, json),
        },
        Commands::Build { commit, store } => {
            let config = load_config(&cli.config)?;
            cmd_build(&config, commit, store.as_deref()).await
        }
        Commands::Admin { url, action } => cmd_admin(&AdminClient::new(url), action).await,
    }
}

fn load_config(path: &Path) -> Result<StackConfig> {
    StackConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn cmd_config_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    config.validate().context("configuration is invalid")?;

    println!("✓ {} is valid", path.display());
    println!("  branch:   {}", config.pipeline.branch);
    println!("  stages:   {}", config.pipeline.build.stages.len());
    println!(
        "  fleet:    {}..{} members, {} policies",
        config.fleet.min_size,
        config.fleet.max_size,
        config.fleet.policies.len()
    );
    println!(
        "  features: edge_gating={} auto_scaling={} multi_az={} https_redirect={}",
        config.features.edge_gating,
        config.features.auto_scaling,
        config.features.multi_az,
        config.features.https_redirect
    );
    Ok(())
}

fn cmd_gate_explain(
    path: &Path,
    tier: Tier,
    req: GateRequest,
    secret_value: Option<String>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(secret) = secret_value {
        config.gate.header_value = secret;
    }
    let policy = GatePolicy::from_config(&config.gate, &config.features)
        .context("failed to build gate policy")?;

    let explanation = explain::explain(&policy, tier, req);
    if json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else {
        println!("{}", explain::render_text(&explanation));
    }
    Ok(())
}

fn plan_scaling(
    config: &StackConfig,
    members: usize,
    rpm: Option<u64>,
    cpu: Option<f64>,
) -> ScalingDecision {
    let planner = ScalingPlanner::new(
        config.fleet.min_size,
        config.fleet.max_size,
        config.fleet.policies.clone(),
    );
    let metrics = FleetMetrics {
        requests_per_minute: rpm,
        avg_cpu_utilization: cpu,
    };
    planner.plan(members, &metrics, Utc::now())
}

fn cmd_scaling_plan(
    path: &Path,
    members: usize,
    rpm: Option<u64>,
    cpu: Option<f64>,
    json: bool,
) -> Result<()> {
    let config = load_config(path)?;
    let decision = plan_scaling(&config, members, rpm, cpu);

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }
    for rec in &decision.recommendations {
        println!("  {:<24} wants {}", rec.policy, rec.desired);
    }
    println!(
        "desired: {} (current {}, bounds {}..{}, driven by {})",
        decision.desired,
        decision.current,
        config.fleet.min_size,
        config.fleet.max_size,
        decision.driven_by.as_deref().unwrap_or("no active policy")
    );
    Ok(())
}

async fn cmd_build(config: &StackConfig, commit: Option<String>, store: Option<&Path>) -> Result<()> {
    let source = match commit {
        Some(commit) => SourceRef::branch(config.pipeline.branch.clone(), commit),
        None => SourceRef::manual("cli"),
    };
    let store_dir = store.unwrap_or(config.pipeline.artifact_dir.as_path());

    let builder = CommandBuilder::from_settings(&config.pipeline.build);
    println!("Building {} ({} stages)", source, builder.stages().len());
    let output = builder
        .build(&source)
        .await
        .with_context(|| format!("build of {source} failed"))?;

    let store = FsArtifactStore::new(store_dir)
        .with_context(|| format!("failed to open artifact store at {}", store_dir.display()))?;
    let digest = store.put(&output.bytes).await.context("failed to publish artifact")?;

    println!("✓ Built in {}ms", output.duration_ms);
    println!("  version:  {}", digest);
    println!("  size:     {} bytes", output.bytes.len());
    println!("  location: {}", store.locate(&digest));
    Ok(())
}

async fn cmd_admin(client: &AdminClient, action: AdminAction) -> Result<()> {
    let response = match action {
        AdminAction::Status => client.get("/pipeline/status").await?,
        AdminAction::Runs => client.get("/pipeline/runs").await?,
        AdminAction::Show { run_id } => client.get(&format!("/pipeline/runs/{run_id}")).await?,
        AdminAction::Trigger {
            commit,
            requested_by,
        } => {
            client
                .post(
                    "/pipeline/trigger",
                    Some(json!({"requestedBy": requested_by, "commit": commit})),
                )
                .await?
        }
        AdminAction::Cancel { run_id, by } => {
            client
                .post(&format!("/pipeline/runs/{run_id}/cancel?by={by}"), None)
                .await?
        }
        AdminAction::Rollback { run_id } => {
            client
                .post(&format!("/pipeline/runs/{run_id}/rollback"), None)
                .await?
        }
        AdminAction::Reconcile => client.post("/pipeline/reconcile", None).await?,
        AdminAction::Fleet => client.get("/fleet").await?,
    };
    print_json(&response)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[pipeline]
branch = "main"

[gate]
header_value = "s3cr3t"

[fleet]
min_size = 1
max_size = 4
"#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("shipgate.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn config_check_accepts_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        assert!(cmd_config_check(&path).is_ok());
    }

    #[test]
    fn config_check_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[fleet]\nmin_size = 5\nmax_size = 2\n");
        let err = cmd_config_check(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("invalid"), "unexpected error: {msg}");
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load"));
    }

    #[test]
    fn scaling_plan_takes_the_larger_recommendation() {
        let config = StackConfig::from_toml_str(CONFIG).unwrap();
        // 150 rpm at 60/instance wants 3; 90% cpu on 2 at 75% wants 3
        let decision = plan_scaling(&config, 2, Some(150), Some(90.0));
        assert_eq!(decision.desired, 3);

        // 600 rpm wants 10, clamped to max
        let decision = plan_scaling(&config, 2, Some(600), None);
        assert_eq!(decision.desired, 4);
    }

    #[test]
    fn header_argument_parsing() {
        assert_eq!(
            parse_header("X-Secret=abc=def").unwrap(),
            ("X-Secret".to_string(), "abc=def".to_string())
        );
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=x").is_err());
    }

    #[tokio::test]
    async fn build_publishes_to_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StackConfig::from_toml_str(CONFIG).unwrap();
        config.pipeline.build.workdir = dir.path().to_path_buf();
        config.pipeline.build.output = "out.bin".into();
        config.pipeline.build.stages = vec![shipgate_core::config::StageSettings {
            name: "write".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf \"$SHIPGATE_COMMIT\" > out.bin".to_string(),
            ],
            timeout_secs: 30,
            enabled: true,
        }];
        let store_dir = dir.path().join("store");

        cmd_build(&config, Some("c0ffee".to_string()), Some(&store_dir))
            .await
            .unwrap();

        let store = FsArtifactStore::new(&store_dir).unwrap();
        let digest = shipgate_state::ContentDigest::from_bytes(b"c0ffee");
        assert_eq!(store.get(&digest).await.unwrap(), b"c0ffee");
    }

    #[tokio::test]
    async fn failed_build_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StackConfig::from_toml_str(CONFIG).unwrap();
        config.pipeline.build.workdir = dir.path().to_path_buf();
        config.pipeline.build.stages = vec![shipgate_core::config::StageSettings {
            name: "broken".to_string(),
            command: vec!["false".to_string()],
            timeout_secs: 30,
            enabled: true,
        }];
        let store_dir = dir.path().join("store");

        let err = cmd_build(&config, None, Some(&store_dir)).await.unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
        assert!(!store_dir.exists());
    }
}
