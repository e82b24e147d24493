//! Source-change events and the filter that decides which ones start runs.

use serde::{Deserialize, Serialize};
use shipgate_state::RunId;

use super::run::SourceRef;

/// Kind of source-control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
    Tag,
    #[serde(other)]
    Other,
}

/// Inbound source trigger `{branch, commitRef, eventType}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub branch: String,
    #[serde(alias = "commitRef")]
    pub commit_ref: String,
    #[serde(alias = "eventType")]
    pub event_type: EventType,
}

impl SourceEvent {
    pub fn push(branch: impl Into<String>, commit_ref: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit_ref: commit_ref.into(),
            event_type: EventType::Push,
        }
    }
}

/// Why an event did not start or queue a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    NotAPush { event_type: EventType },
    OtherBranch { branch: String },
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::NotAPush { event_type } => {
                write!(f, "event type {:?} does not trigger", event_type)
            }
            IgnoreReason::OtherBranch { branch } => {
                write!(f, "branch {} is not the pipeline branch", branch)
            }
        }
    }
}

/// Admits only pushes to the designated branch.
#[derive(Debug, Clone)]
pub struct TriggerFilter {
    branch: String,
}

impl TriggerFilter {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: normalize_branch(&branch.into()).to_string(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn admit(&self, event: &SourceEvent) -> Result<SourceRef, IgnoreReason> {
        if event.event_type != EventType::Push {
            return Err(IgnoreReason::NotAPush {
                event_type: event.event_type,
            });
        }
        let branch = normalize_branch(&event.branch);
        if branch != self.branch {
            return Err(IgnoreReason::OtherBranch {
                branch: branch.to_string(),
            });
        }
        Ok(SourceRef::branch(branch, event.commit_ref.clone()))
    }
}

fn normalize_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

/// What happened to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// No run was active; this one is now `Building`.
    Started { run_id: RunId },
    /// Parked in the single pending slot, replacing `superseded` if set.
    Queued { superseded: Option<SourceRef> },
    Ignored { reason: IgnoreReason },
}
