//! The daemon's periodic maintenance tick.
//!
//! Each tick refreshes member health, lets the autoscaler converge the fleet
//! (when auto-scaling is enabled), brings stale members up to the current
//! artifact, and flushes the counters.

use std::time::Duration;

use chrono::Utc;
use shipgate_core::metrics::METRICS;
use shipgate_core::{Autoscaler, Orchestrator, PipelineError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub struct Housekeeper {
    orchestrator: Orchestrator,
    autoscaler: Option<Autoscaler>,
    interval: Duration,
}

impl Housekeeper {
    pub fn new(orchestrator: Orchestrator, autoscaler: Option<Autoscaler>, interval: Duration) -> Self {
        Self {
            orchestrator,
            autoscaler,
            interval,
        }
    }

    pub async fn tick(&mut self) {
        self.orchestrator.fleet().refresh_health().await;

        if let Some(autoscaler) = self.autoscaler.as_mut() {
            match autoscaler.tick(Utc::now()).await {
                Ok(decision) if decision.delta() != 0 => {
                    tracing::info!(
                        current = decision.current,
                        desired = decision.desired,
                        driven_by = ?decision.driven_by,
                        "fleet resized"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "autoscaler tick failed"),
            }
        }

        self.catch_up().await;
        METRICS.flush();
    }

    /// Reconcile members that joined after the last successful deployment.
    async fn catch_up(&self) {
        let Some(current) = self.orchestrator.current_artifact() else {
            return;
        };
        if !self.orchestrator.is_idle()
            || self
                .orchestrator
                .fleet()
                .stale_members(&current.version)
                .is_empty()
        {
            return;
        }
        match self.orchestrator.reconcile().await {
            Ok(deployment) => tracing::info!(
                deployment_id = %deployment.id,
                targets = deployment.targets.len(),
                status = ?deployment.status,
                "stale members reconciled"
            ),
            Err(PipelineError::Busy { holder }) => {
                tracing::debug!(holder = %holder, "reconcile skipped, slot taken")
            }
            Err(e) => tracing::warn!(error = %e, "reconcile failed"),
        }
    }

    /// Tick every interval until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => break,
            }
        }
        METRICS.flush();
    }
}
