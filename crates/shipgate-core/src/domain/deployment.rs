//! Deployment records: one artifact applied to one fleet snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipgate_state::ContentDigest;
use uuid::Uuid;

/// Fleet member identifier (e.g. `i-0001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        MemberId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(pub Uuid);

impl DeploymentId {
    pub fn new() -> Self {
        DeploymentId(Uuid::new_v4())
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// Result of rolling one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MemberOutcome {
    /// Applied, healthy and serving the new artifact.
    Activated,
    ApplyFailed { message: String },
    /// Applied but reported unhealthy until its deadline.
    Unhealthy,
    TimedOut,
    /// Still running when the deployment was decided.
    InFlight,
}

impl MemberOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MemberOutcome::Activated)
    }
}

/// One application of an artifact to a fixed snapshot of fleet members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub artifact: ContentDigest,
    /// Membership captured at start; never extended afterwards.
    pub targets: Vec<MemberId>,
    pub status: DeploymentStatus,
    pub outcomes: BTreeMap<MemberId, MemberOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(artifact: ContentDigest, targets: Vec<MemberId>) -> Self {
        Self {
            id: DeploymentId::new(),
            artifact,
            targets,
            status: DeploymentStatus::Pending,
            outcomes: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, member: MemberId, outcome: MemberOutcome) {
        self.outcomes.insert(member, outcome);
    }

    /// Close the deployment. Targets without a recorded outcome are `InFlight`.
    pub fn finish(&mut self, status: DeploymentStatus) {
        for target in &self.targets {
            self.outcomes
                .entry(target.clone())
                .or_insert(MemberOutcome::InFlight);
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn activated(&self) -> impl Iterator<Item = &MemberId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(m, _)| m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_marks_missing_outcomes_in_flight() {
        let targets = vec![MemberId::new("i-1"), MemberId::new("i-2"), MemberId::new("i-3")];
        let mut d = Deployment::new(ContentDigest::from_bytes(b"v7"), targets);
        d.record(MemberId::new("i-1"), MemberOutcome::Activated);
        d.record(MemberId::new("i-2"), MemberOutcome::TimedOut);
        d.finish(DeploymentStatus::Failed);

        assert_eq!(d.outcomes.len(), 3);
        assert_eq!(d.outcomes[&MemberId::new("i-3")], MemberOutcome::InFlight);
        assert_eq!(d.activated().count(), 1);
        assert!(d.finished_at.is_some());
    }

    #[test]
    fn member_outcome_serde_tag() {
        let json = serde_json::to_value(MemberOutcome::ApplyFailed {
            message: "disk full".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "apply_failed");
    }
}
