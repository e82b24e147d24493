//! Rolling deployment of one artifact across a fleet snapshot.
//!
//! Every target is rolled concurrently on its own detached task:
//! stop serving, apply, poll health, resume serving. The deployer waits on
//! those tasks with an independent per-member timeout and decides the
//! deployment as soon as one member fails. Tasks still running at that point
//! are left to finish on their own.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::domain::{
    Artifact, Deployment, DeploymentStatus, FailureReason, MemberId, MemberOutcome,
};
use crate::fleet::{Fleet, FleetMember};
use crate::obs;

/// Deployment record plus the reason it failed, if it did.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub deployment: Deployment,
    pub failure: Option<FailureReason>,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Clone)]
pub struct Deployer {
    fleet: Arc<Fleet>,
    member_timeout: Duration,
    health_poll_interval: Duration,
}

impl Deployer {
    pub fn new(fleet: Arc<Fleet>, member_timeout: Duration, health_poll_interval: Duration) -> Self {
        Self {
            fleet,
            member_timeout,
            health_poll_interval,
        }
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Deploy to the current membership. An empty fleet fails with
    /// [`FailureReason::NoTargets`].
    pub async fn deploy(&self, artifact: &Artifact, bytes: Arc<Vec<u8>>) -> DeployReport {
        let targets = self.fleet.snapshot();
        if targets.is_empty() {
            let mut deployment = Deployment::new(artifact.version.clone(), Vec::new());
            deployment.finish(DeploymentStatus::Failed);
            return DeployReport {
                deployment,
                failure: Some(FailureReason::NoTargets),
            };
        }
        self.roll_out(targets, artifact, bytes).await
    }

    /// Bring members whose active artifact differs from `artifact` up to
    /// date. Succeeds trivially when nothing is stale.
    pub async fn reconcile(&self, artifact: &Artifact, bytes: Arc<Vec<u8>>) -> DeployReport {
        let stale = self.fleet.stale_members(&artifact.version);
        if stale.is_empty() {
            let mut deployment = Deployment::new(artifact.version.clone(), Vec::new());
            deployment.finish(DeploymentStatus::Succeeded);
            return DeployReport {
                deployment,
                failure: None,
            };
        }
        self.roll_out(stale, artifact, bytes).await
    }

    async fn roll_out(
        &self,
        targets: Vec<Arc<dyn FleetMember>>,
        artifact: &Artifact,
        bytes: Arc<Vec<u8>>,
    ) -> DeployReport {
        let started = Instant::now();
        let ids: Vec<MemberId> = targets.iter().map(|m| m.id().clone()).collect();
        let mut deployment = Deployment::new(artifact.version.clone(), ids);
        deployment.status = DeploymentStatus::InProgress;
        let deployment_id = deployment.id.to_string();

        let mut pending = FuturesUnordered::new();
        for member in targets {
            let id = member.id().clone();
            let handle = tokio::spawn(roll_member(
                self.fleet.clone(),
                member,
                artifact.clone(),
                bytes.clone(),
                self.member_timeout,
                self.health_poll_interval,
            ));
            let timeout = self.member_timeout;
            pending.push(async move {
                let outcome = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_err)) => MemberOutcome::ApplyFailed {
                        message: format!("rollout task failed: {join_err}"),
                    },
                    Err(_) => MemberOutcome::TimedOut,
                };
                (id, outcome)
            });
        }

        let mut failure = None;
        while let Some((id, outcome)) = pending.next().await {
            obs::emit_member_outcome(&deployment_id, id.as_str(), outcome_label(&outcome));
            let reason = failure_for(&id, &outcome);
            deployment.record(id, outcome);
            if let Some(reason) = reason {
                failure = Some(reason);
                break;
            }
        }

        let status = if failure.is_some() {
            DeploymentStatus::Failed
        } else {
            DeploymentStatus::Succeeded
        };
        deployment.finish(status);
        obs::emit_deployment_finished(
            &deployment_id,
            if failure.is_some() { "failed" } else { "succeeded" },
            deployment.targets.len(),
            started.elapsed().as_millis() as u64,
        );

        DeployReport {
            deployment,
            failure,
        }
    }
}

async fn roll_member(
    fleet: Arc<Fleet>,
    member: Arc<dyn FleetMember>,
    artifact: Artifact,
    bytes: Arc<Vec<u8>>,
    timeout: Duration,
    poll_interval: Duration,
) -> MemberOutcome {
    let deadline = Instant::now() + timeout;
    let id = member.id().clone();

    fleet.set_serving(&id, false);
    if let Err(e) = member.apply_artifact(&artifact, &bytes).await {
        // Prior version is still in place.
        fleet.set_serving(&id, true);
        return MemberOutcome::ApplyFailed {
            message: e.to_string(),
        };
    }

    loop {
        if member.health_check().await.is_healthy() {
            fleet.record_activation(&id, artifact.version.clone());
            fleet.set_serving(&id, true);
            return MemberOutcome::Activated;
        }
        if Instant::now() + poll_interval > deadline {
            fleet.set_healthy(&id, false);
            return MemberOutcome::Unhealthy;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn failure_for(member: &MemberId, outcome: &MemberOutcome) -> Option<FailureReason> {
    match outcome {
        MemberOutcome::Activated | MemberOutcome::InFlight => None,
        MemberOutcome::ApplyFailed { message } => Some(FailureReason::MemberApply {
            member: member.clone(),
            message: message.clone(),
        }),
        MemberOutcome::Unhealthy | MemberOutcome::TimedOut => {
            Some(FailureReason::MemberHealthTimeout {
                member: member.clone(),
            })
        }
    }
}

fn outcome_label(outcome: &MemberOutcome) -> &'static str {
    match outcome {
        MemberOutcome::Activated => "activated",
        MemberOutcome::ApplyFailed { .. } => "apply_failed",
        MemberOutcome::Unhealthy => "unhealthy",
        MemberOutcome::TimedOut => "timed_out",
        MemberOutcome::InFlight => "in_flight",
    }
}
