//! Pipeline run record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipgate_state::{ContentDigest, RunId};

use super::artifact::Artifact;
use super::deployment::Deployment;
use super::error::{FailureReason, PipelineError, Result};

/// Lifecycle state of a pipeline run.
///
/// ```text
/// Queued -> Building -> Publishing -> Deploying -> Succeeded
///              |            |             |
///              +------------+-------------+--> Failed -> RolledBack
/// Queued | Building --> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Building,
    Publishing,
    Deploying,
    Succeeded,
    Failed,
    RolledBack,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Building => "building",
            RunState::Publishing => "publishing",
            RunState::Deploying => "deploying",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::RolledBack => "rolled_back",
            RunState::Cancelled => "cancelled",
        }
    }

    /// Terminal runs no longer hold the single in-flight slot.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::RolledBack | RunState::Cancelled
        )
    }

    /// Cancellation is only accepted before an artifact is published.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, RunState::Queued | RunState::Building)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Queued, Building)
                | (Queued, Cancelled)
                | (Building, Publishing)
                | (Building, Failed)
                | (Building, Cancelled)
                | (Publishing, Deploying)
                | (Publishing, Failed)
                | (Deploying, Succeeded)
                | (Deploying, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run was triggered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// A push to the designated branch.
    Branch { branch: String, commit: String },
    /// An operator-requested run, optionally pinned to a commit.
    Manual {
        requested_by: String,
        commit: Option<String>,
    },
}

impl SourceRef {
    pub fn branch(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        SourceRef::Branch {
            branch: branch.into(),
            commit: commit.into(),
        }
    }

    pub fn manual(requested_by: impl Into<String>) -> Self {
        SourceRef::Manual {
            requested_by: requested_by.into(),
            commit: None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            SourceRef::Branch { commit, .. } => Some(commit),
            SourceRef::Manual { commit, .. } => commit.as_deref(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Branch { branch, commit } => {
                write!(f, "{}@{}", branch, short_commit(commit))
            }
            SourceRef::Manual {
                requested_by,
                commit: Some(commit),
            } => write!(f, "manual:{}@{}", requested_by, short_commit(commit)),
            SourceRef::Manual { requested_by, .. } => write!(f, "manual:{}", requested_by),
        }
    }
}

fn short_commit(commit: &str) -> String {
    commit.chars().take(7).collect()
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// One execution of the pipeline, from trigger to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub trigger: SourceRef,
    pub state: RunState,
    /// Set when `Building` completes and the artifact is registered.
    pub artifact: Option<Artifact>,
    pub deployment: Option<Deployment>,
    /// Deployment that re-applied the last good artifact, if any.
    pub rollback: Option<Deployment>,
    pub failure: Option<FailureReason>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a run in `Queued`.
    pub fn new(trigger: SourceRef) -> Self {
        Self {
            id: RunId::new(),
            trigger,
            state: RunState::Queued,
            artifact: None,
            deployment: None,
            rollback: None,
            failure: None,
            transitions: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting anything the state machine does not allow.
    pub fn advance(&mut self, next: RunState) -> Result<&Transition> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                run_id: self.id,
                from: self.state,
                to: next,
            });
        }
        let at = Utc::now();
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            at,
        });
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(&self.transitions[self.transitions.len() - 1])
    }

    /// Record a failure reason and move to `Failed`.
    pub fn fail(&mut self, reason: FailureReason) -> Result<&Transition> {
        self.advance(RunState::Failed)?;
        self.failure = Some(reason);
        Ok(&self.transitions[self.transitions.len() - 1])
    }

    pub fn artifact_ref(&self) -> Option<&ContentDigest> {
        self.artifact.as_ref().map(|a| &a.version)
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}
