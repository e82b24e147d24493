//! Applies scaling decisions to the fleet through a provisioner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::scaling::{ScalingDecision, ScalingPlanner};
use super::{Fleet, FleetMember};
use crate::config::{Features, FleetConfig};
use crate::domain::MemberId;
use crate::obs;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no capacity left to launch a member")]
    Exhausted,

    #[error("provisioner failed: {0}")]
    Failed(String),
}

/// Launches and terminates compute instances.
#[async_trait]
pub trait FleetProvisioner: Send + Sync {
    async fn launch(&self, zone: Option<&str>) -> Result<Arc<dyn FleetMember>, ProvisionError>;

    async fn terminate(&self, member: &MemberId) -> Result<(), ProvisionError>;
}

pub struct Autoscaler {
    fleet: Arc<Fleet>,
    provisioner: Arc<dyn FleetProvisioner>,
    planner: ScalingPlanner,
    zones: Vec<String>,
    multi_az: bool,
}

impl Autoscaler {
    pub fn new(
        fleet: Arc<Fleet>,
        provisioner: Arc<dyn FleetProvisioner>,
        config: &FleetConfig,
        features: &Features,
    ) -> Self {
        Self {
            fleet,
            provisioner,
            planner: ScalingPlanner::new(config.min_size, config.max_size, config.policies.clone()),
            zones: config.availability_zones.clone(),
            multi_az: features.multi_az,
        }
    }

    pub fn planner(&self) -> &ScalingPlanner {
        &self.planner
    }

    /// With multi-AZ, the zone holding the fewest members; otherwise the
    /// first configured zone.
    fn next_zone(&self) -> Option<String> {
        if !self.multi_az {
            return self.zones.first().cloned();
        }
        self.fleet
            .zone_counts(&self.zones)
            .into_iter()
            .filter(|(zone, _)| self.zones.contains(zone))
            .min_by_key(|(_, count)| *count)
            .map(|(zone, _)| zone)
    }

    /// Evaluate policies once and converge the fleet on the decision.
    ///
    /// Scale-in removes the most recently joined members first. A member
    /// leaves the fleet only once the provisioner has terminated it; until
    /// then it is held out of rotation.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<ScalingDecision, ProvisionError> {
        let current = self.fleet.len();
        let decision = self.planner.plan(current, &self.fleet.metrics(), now);
        obs::emit_scaling_decision(current, decision.desired, decision.driven_by.as_deref());

        if decision.desired > current {
            for _ in current..decision.desired {
                let zone = self.next_zone();
                let member = self.provisioner.launch(zone.as_deref()).await?;
                tracing::info!(member = %member.id(), zone = ?zone, "member launched");
                self.fleet.add(member);
            }
        } else if decision.desired < current {
            for id in self.fleet.newest(current - decision.desired) {
                self.fleet.set_serving(&id, false);
                if let Err(e) = self.provisioner.terminate(&id).await {
                    self.fleet.set_serving(&id, true);
                    return Err(e);
                }
                self.fleet.remove(&id);
                tracing::info!(member = %id, "member terminated");
            }
        }

        if decision.desired != current {
            self.planner.record_action(&decision, now);
        }
        Ok(decision)
    }
}
