use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use shipgate_core::{LogFormat, Protocol, StackConfig, Tier};
use shipgated::App;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::Level;

#[derive(Parser)]
#[command(name = "shipgated")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shipgate daemon: pipeline admin API, gated listeners, autoscaler", long_about = None)]
struct Args {
    /// Stack configuration file
    #[arg(short, long, env = "SHIPGATE_CONFIG", default_value = "shipgate.toml")]
    config: PathBuf,

    /// Overrides gate.header_value
    #[arg(long, env = "SHIPGATE_SECRET_VALUE", hide_env_values = true)]
    secret_value: Option<String>,

    /// Log line format: text or json
    #[arg(long, env = "SHIPGATE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipgate_core::init_tracing(args.log_format, level);

    let mut config = StackConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(secret) = args.secret_value {
        config.gate.header_value = secret;
    }
    config.validate().context("invalid configuration")?;

    let app = App::from_config(config)?;
    let daemon = app.config.daemon.clone();
    tracing::info!(
        members = app.fleet.len(),
        spares = daemon.spare_members.len(),
        branch = %app.config.pipeline.branch,
        "shipgated starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = tokio::task::JoinSet::new();
    for (name, bind, router) in [
        ("admin", &daemon.admin_bind, app.admin_router()),
        ("edge", &daemon.edge_bind, app.gate_router(Tier::Edge, Protocol::Https)),
        (
            "origin-http",
            &daemon.origin_http_bind,
            app.gate_router(Tier::Origin, Protocol::Http),
        ),
        (
            "origin-https",
            &daemon.origin_https_bind,
            app.gate_router(Tier::Origin, Protocol::Https),
        ),
    ] {
        let listener = TcpListener::bind(bind.as_str())
            .await
            .with_context(|| format!("failed to bind {name} listener on {bind}"))?;
        tracing::info!(listener = name, addr = %bind, "listening");
        servers.spawn(serve(name, listener, router, shutdown_rx.clone()));
    }
    servers.spawn({
        let keeper = app.housekeeper();
        let shutdown = shutdown_rx.clone();
        async move {
            keeper.run(shutdown).await;
            Ok(())
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown requested");
        }
        Some(joined) = servers.join_next() => {
            joined.context("server task panicked")??;
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(joined) = servers.join_next().await {
        joined.context("server task panicked")??;
    }
    tracing::info!("shipgated stopped");
    Ok(())
}

async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .with_context(|| format!("{name} listener failed"))
}
