//! Scriptable fakes for the builder, fleet member and provisioner seams.
//!
//! Used by this crate's tests and by downstream integration tests; nothing
//! here touches the network or the filesystem.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use shipgate_state::ContentDigest;
use tokio::sync::watch;

use crate::build::{BuildError, BuildOutput, Builder};
use crate::domain::{Artifact, MemberId, SourceRef};
use crate::fleet::autoscaler::{FleetProvisioner, ProvisionError};
use crate::fleet::{FleetMember, HealthReport, MemberError};

// ---------------------------------------------------------------------------
// ScriptedBuilder
// ---------------------------------------------------------------------------

/// One scripted build result, consumed in order.
#[derive(Debug, Clone)]
pub enum BuildStep {
    Output(Vec<u8>),
    Fail(String),
    /// Never completes; exercises the build timeout.
    Hang,
}

/// Builder that follows a script, then falls back to deterministic output
/// derived from the source reference.
///
/// `hold()` parks every build until `release()`, which keeps a run in
/// `Building` for as long as a test needs.
pub struct ScriptedBuilder {
    script: Mutex<VecDeque<BuildStep>>,
    calls: Mutex<Vec<SourceRef>>,
    held: watch::Sender<bool>,
}

impl Default for ScriptedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            held,
        }
    }

    pub fn push_step(&self, step: BuildStep) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(step);
    }

    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Sources built so far, in call order.
    pub fn calls(&self) -> Vec<SourceRef> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn output_for(source: &SourceRef) -> Vec<u8> {
        format!("bundle:{source}").into_bytes()
    }
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn build(&self, source: &SourceRef) -> Result<BuildOutput, BuildError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(source.clone());
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|h| !*h).await;

        let step = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match step {
            Some(BuildStep::Output(bytes)) => Ok(BuildOutput {
                bytes,
                duration_ms: 1,
            }),
            Some(BuildStep::Fail(message)) => Err(BuildError::Reported(message)),
            Some(BuildStep::Hang) => std::future::pending().await,
            None => Ok(BuildOutput {
                bytes: Self::output_for(source),
                duration_ms: 1,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeMember
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ApplyBehavior {
    Succeed,
    Reject(String),
    /// Reject the next apply, then succeed.
    RejectNext(String),
    /// Apply never returns.
    Hang,
    Delay(Duration),
}

pub struct FakeMember {
    id: MemberId,
    zone: Option<String>,
    endpoint: Option<String>,
    behavior: Mutex<ApplyBehavior>,
    healthy: AtomicBool,
    cpu: Mutex<Option<f64>>,
    applied: Mutex<Vec<ContentDigest>>,
    health_checks: AtomicUsize,
}

impl FakeMember {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(id),
            zone: None,
            endpoint: None,
            behavior: Mutex::new(ApplyBehavior::Succeed),
            healthy: AtomicBool::new(true),
            cpu: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            health_checks: AtomicUsize::new(0),
        }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn set_behavior(&self, behavior: ApplyBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_cpu(&self, cpu: Option<f64>) {
        *self.cpu.lock().unwrap_or_else(PoisonError::into_inner) = cpu;
    }

    /// Artifacts successfully applied, oldest first.
    pub fn applied(&self) -> Vec<ContentDigest> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FleetMember for FakeMember {
    fn id(&self) -> &MemberId {
        &self.id
    }

    fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    async fn apply_artifact(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), MemberError> {
        let behavior = {
            let mut current = self.behavior.lock().unwrap_or_else(PoisonError::into_inner);
            let behavior = current.clone();
            if matches!(behavior, ApplyBehavior::RejectNext(_)) {
                *current = ApplyBehavior::Succeed;
            }
            behavior
        };
        match behavior {
            ApplyBehavior::Succeed => {}
            ApplyBehavior::Reject(message) | ApplyBehavior::RejectNext(message) => {
                return Err(MemberError::Rejected(message))
            }
            ApplyBehavior::Hang => std::future::pending::<()>().await,
            ApplyBehavior::Delay(d) => tokio::time::sleep(d).await,
        }
        if ContentDigest::from_bytes(bytes) != artifact.version {
            return Err(MemberError::Rejected("digest mismatch".to_string()));
        }
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).push(artifact.version.clone());
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        let report = if self.healthy.load(Ordering::SeqCst) {
            HealthReport::healthy()
        } else {
            HealthReport::unhealthy()
        };
        match *self.cpu.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(cpu) => report.with_cpu(cpu),
            None => report,
        }
    }
}

// ---------------------------------------------------------------------------
// FakeProvisioner
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProvisioner {
    next: AtomicUsize,
    launched: Mutex<Vec<Arc<FakeMember>>>,
    terminated: Mutex<Vec<MemberId>>,
    fail_terminate: AtomicBool,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> Vec<Arc<FakeMember>> {
        self.launched.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn terminated(&self) -> Vec<MemberId> {
        self.terminated.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FleetProvisioner for FakeProvisioner {
    async fn launch(&self, zone: Option<&str>) -> Result<Arc<dyn FleetMember>, ProvisionError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let mut member = FakeMember::new(format!("i-auto-{n}"));
        if let Some(zone) = zone {
            member = member.in_zone(zone);
        }
        let member = Arc::new(member);
        self.launched.lock().unwrap_or_else(PoisonError::into_inner).push(member.clone());
        Ok(member)
    }

    async fn terminate(&self, member: &MemberId) -> Result<(), ProvisionError> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(ProvisionError::Failed(format!("cannot terminate {member}")));
        }
        self.terminated.lock().unwrap_or_else(PoisonError::into_inner).push(member.clone());
        Ok(())
    }
}
