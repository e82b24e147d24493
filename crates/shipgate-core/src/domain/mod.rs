//! Domain models for Shipgate.
//!
//! Canonical definitions for the core entities:
//! - `PipelineRun`: one trigger-to-terminal execution of build + deploy
//! - `Artifact`: an immutable, content-addressed build output
//! - `Deployment`: one application of an artifact to a fleet snapshot
//! - `SourceEvent` / `TriggerFilter`: what starts a run

pub mod artifact;
pub mod deployment;
pub mod error;
pub mod run;
pub mod trigger;

pub use artifact::Artifact;
pub use deployment::{Deployment, DeploymentId, DeploymentStatus, MemberId, MemberOutcome};
pub use error::{FailureReason, PipelineError, Result};
pub use run::{PipelineRun, RunState, SourceRef, Transition};
pub use trigger::{EventType, IgnoreReason, SourceEvent, TriggerFilter, TriggerOutcome};
