//! Wires configuration into the running pieces of the daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use shipgate_ci::CommandBuilder;
use shipgate_core::{
    Autoscaler, Builder, Fleet, GatePolicy, Orchestrator, Protocol, StackConfig, Tier,
    TrafficGate,
};
use shipgate_state::fakes::MemoryRunLedger;
use shipgate_state::{ArtifactStore, FsArtifactStore, RunLedger};

use crate::api::{self, AppState};
use crate::listener::{self, ListenerState};
use crate::member::HttpFleetMember;
use crate::provisioner::SparePool;
use crate::scaler::Housekeeper;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct App {
    pub config: StackConfig,
    pub fleet: Arc<Fleet>,
    pub orchestrator: Orchestrator,
    pub gate: Arc<TrafficGate>,
    pub provisioner: Arc<SparePool>,
    client: reqwest::Client,
}

impl App {
    /// Filesystem artifact store, command-stage builder, in-process ledger.
    pub fn from_config(config: StackConfig) -> Result<Self> {
        let store = FsArtifactStore::new(&config.pipeline.artifact_dir).with_context(|| {
            format!(
                "failed to open artifact store at {}",
                config.pipeline.artifact_dir.display()
            )
        })?;
        let builder = CommandBuilder::from_settings(&config.pipeline.build);
        Self::with_parts(
            config,
            Arc::new(builder),
            Arc::new(store),
            Arc::new(MemoryRunLedger::new()),
        )
    }

    pub fn with_parts(
        config: StackConfig,
        builder: Arc<dyn Builder>,
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn RunLedger>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let fleet = Arc::new(Fleet::new());
        for member in &config.daemon.members {
            fleet.add(Arc::new(HttpFleetMember::new(member, client.clone())));
        }
        let provisioner = Arc::new(SparePool::new(
            &config.daemon.members,
            &config.daemon.spare_members,
            client.clone(),
        ));

        let policy = GatePolicy::from_config(&config.gate, &config.features)
            .context("invalid gate configuration")?;
        let gate = Arc::new(TrafficGate::new(policy, fleet.clone()));
        let orchestrator =
            Orchestrator::new(&config.pipeline, builder, store, ledger, fleet.clone());

        Ok(Self {
            config,
            fleet,
            orchestrator,
            gate,
            provisioner,
            client,
        })
    }

    pub fn admin_router(&self) -> Router {
        api::create_router(AppState {
            orchestrator: self.orchestrator.clone(),
            gate: self.gate.clone(),
        })
    }

    /// Origin listeners always evaluate under the protocol of their port;
    /// only the edge may defer to an upstream TLS terminator.
    pub fn gate_router(&self, tier: Tier, protocol: Protocol) -> Router {
        listener::gate_router(ListenerState {
            tier,
            protocol,
            trust_forwarded_proto: tier == Tier::Edge && self.config.daemon.trust_forwarded_proto,
            gate: self.gate.clone(),
            client: self.client.clone(),
        })
    }

    /// Periodic health refresh, scaling and catch-up deployments.
    pub fn housekeeper(&self) -> Housekeeper {
        let autoscaler = self.config.features.auto_scaling.then(|| {
            Autoscaler::new(
                self.fleet.clone(),
                self.provisioner.clone(),
                &self.config.fleet,
                &self.config.features,
            )
        });
        Housekeeper::new(
            self.orchestrator.clone(),
            autoscaler,
            Duration::from_secs(self.config.fleet.evaluation_interval_secs),
        )
    }
}
