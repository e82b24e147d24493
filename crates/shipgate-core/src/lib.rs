//! Shipgate core: a build-deploy pipeline coupled to a gated traffic router.
//!
//! - [`orchestrator`]: single-in-flight run state machine with a
//!   latest-wins pending slot, cancellation and rollback
//! - [`deploy`]: rolling, fail-fast fan-out of an artifact to a fleet snapshot
//! - [`fleet`]: membership, health, request metering and max-wins scaling
//! - [`gate`]: edge tier and priority-ordered listener rules
//! - [`config`]: one TOML-backed stack configuration with feature toggles

pub mod build;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod fleet;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod telemetry;
pub mod testing;

pub use build::{BuildError, BuildOutput, Builder};
pub use config::{ConfigError, Features, StackConfig};
pub use deploy::{DeployReport, Deployer};
pub use domain::{
    Artifact, Deployment, DeploymentStatus, FailureReason, MemberId, MemberOutcome,
    PipelineError, PipelineRun, Result, RunState, SourceEvent, SourceRef, TriggerOutcome,
};
pub use fleet::autoscaler::{Autoscaler, FleetProvisioner, ProvisionError};
pub use fleet::scaling::{ScalingDecision, ScalingPlanner, ScalingPolicy};
pub use fleet::{Fleet, FleetMember, HealthReport, MemberError};
pub use gate::{GateOutcome, GatePolicy, GateRequest, GateResponse, Protocol, Tier, TrafficGate};
pub use orchestrator::Orchestrator;
pub use telemetry::{init_tracing, LogFormat};
