//! Pipeline orchestrator: trigger, build, publish, deploy, roll back.
//!
//! All run state lives in one `Book` behind a std mutex. The lock is only
//! held for synchronous bookkeeping; builds, store calls, deployments and
//! ledger writes happen outside it. One slot admits a single in-flight
//! operation (a run, a rollback or a reconciliation); triggers arriving
//! while the slot is taken park in a one-entry queue where the latest
//! trigger replaces any earlier one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use shipgate_state::{ArtifactStore, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata};
use tokio::sync::{watch, Notify};
use tracing::Instrument;

use crate::build::Builder;
use crate::config::PipelineConfig;
use crate::deploy::Deployer;
use crate::domain::{
    Artifact, Deployment, FailureReason, PipelineError, PipelineRun, Result, RunState,
    SourceEvent, SourceRef, TriggerFilter, TriggerOutcome,
};
use crate::fleet::Fleet;
use crate::metrics::METRICS;
use crate::obs;

enum Slot {
    Run { run_id: RunId, cancel: Arc<Notify> },
    Rollback { run_id: RunId },
    Reconcile,
}

impl Slot {
    fn describe(&self) -> String {
        match self {
            Slot::Run { run_id, .. } => format!("run {run_id}"),
            Slot::Rollback { run_id } => format!("rollback of run {run_id}"),
            Slot::Reconcile => "reconciliation".to_string(),
        }
    }
}

enum LedgerOp {
    Create(RunId, RunMetadata),
    Append(RunId, RunEvent),
}

#[derive(Default)]
struct Book {
    runs: Vec<PipelineRun>,
    index: HashMap<RunId, usize>,
    active: Option<Slot>,
    pending: Option<SourceRef>,
    seqs: HashMap<RunId, u64>,
}

impl Book {
    fn run(&self, id: &RunId) -> Option<&PipelineRun> {
        self.index.get(id).map(|&i| &self.runs[i])
    }

    fn run_mut(&mut self, id: &RunId) -> Option<&mut PipelineRun> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.runs[i]),
            None => None,
        }
    }

    fn insert(&mut self, run: PipelineRun) {
        self.index.insert(run.id, self.runs.len());
        self.runs.push(run);
    }

    fn event(&mut self, run_id: RunId, kind: &str, payload: serde_json::Value) -> LedgerOp {
        let seq = self.seqs.entry(run_id).or_insert(0);
        *seq += 1;
        LedgerOp::Append(run_id, RunEvent::new(*seq, kind, payload))
    }

    /// Artifact of the most recent `Succeeded` run.
    fn current_artifact(&self) -> Option<Artifact> {
        self.runs
            .iter()
            .rev()
            .find(|r| r.state == RunState::Succeeded)
            .and_then(|r| r.artifact.clone())
    }

    /// Apply a state change and describe it for the ledger.
    fn transition(
        &mut self,
        run_id: RunId,
        next: RunState,
        failure: Option<FailureReason>,
    ) -> Result<LedgerOp> {
        let run = self
            .run_mut(&run_id)
            .ok_or(PipelineError::RunNotFound(run_id))?;
        let from = run.state;
        match failure.clone() {
            Some(reason) if next == RunState::Failed => {
                run.fail(reason)?;
            }
            Some(reason) => {
                run.advance(next)?;
                run.failure = Some(reason);
            }
            None => {
                run.advance(next)?;
            }
        }

        let id = run_id.to_string();
        obs::emit_transition(&id, from.as_str(), next.as_str());
        if next.is_terminal() {
            let elapsed = run
                .finished_at
                .map(|end| (end - run.created_at).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            let failure_text = run.failure.as_ref().map(|f| f.to_string());
            obs::emit_run_finished(&id, next.as_str(), elapsed, failure_text.as_deref());
            match next {
                RunState::Succeeded => METRICS.inc_runs_succeeded(),
                RunState::Failed => METRICS.inc_runs_failed(),
                RunState::RolledBack => METRICS.inc_runs_rolled_back(),
                _ => {}
            }
        }

        Ok(self.event(
            run_id,
            "transition",
            json!({ "from": from, "to": next, "failure": failure }),
        ))
    }
}

struct Inner {
    filter: TriggerFilter,
    build_timeout: Duration,
    auto_rollback: bool,
    builder: Arc<dyn Builder>,
    store: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn RunLedger>,
    deployer: Deployer,
    book: Mutex<Book>,
    changed: watch::Sender<u64>,
}

/// Handle to the pipeline. Cheap to clone; every clone drives the same
/// book.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Releases the in-flight slot on drop and starts the pending trigger.
struct SlotRelease(Orchestrator);

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        builder: Arc<dyn Builder>,
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn RunLedger>,
        fleet: Arc<Fleet>,
    ) -> Self {
        let deployer = Deployer::new(
            fleet,
            Duration::from_secs(config.member_timeout_secs),
            Duration::from_millis(config.health_poll_interval_ms),
        );
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                filter: TriggerFilter::new(config.branch.clone()),
                build_timeout: Duration::from_secs(config.build_timeout_secs),
                auto_rollback: config.auto_rollback,
                builder,
                store,
                ledger,
                deployer,
                book: Mutex::new(Book::default()),
                changed,
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.inner.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.inner.changed.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        self.inner.deployer.fleet()
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Filter a source event, then trigger. Must run inside a Tokio runtime.
    pub fn handle_event(&self, event: &SourceEvent) -> TriggerOutcome {
        match self.inner.filter.admit(event) {
            Ok(source) => self.trigger(source),
            Err(reason) => {
                obs::emit_trigger_ignored(&event.branch, &reason);
                TriggerOutcome::Ignored { reason }
            }
        }
    }

    /// Start a run now, or park the trigger if the slot is taken. Must run
    /// inside a Tokio runtime.
    pub fn trigger(&self, source: SourceRef) -> TriggerOutcome {
        let outcome = {
            let mut book = self.book();
            if book.active.is_some() {
                let superseded = book.pending.replace(source.clone());
                obs::emit_run_queued(
                    &source.to_string(),
                    superseded.as_ref().map(|s| s.to_string()).as_deref(),
                );
                TriggerOutcome::Queued { superseded }
            } else {
                let run_id = self.start_locked(&mut book, source);
                TriggerOutcome::Started { run_id }
            }
        };
        self.bump();
        outcome
    }

    /// Create the run in `Queued`, move it to `Building`, take the slot and
    /// spawn its driver. The driver writes the ledger entries first.
    fn start_locked(&self, book: &mut Book, source: SourceRef) -> RunId {
        let run = PipelineRun::new(source.clone());
        let run_id = run.id;
        book.insert(run);

        let mut ops = vec![LedgerOp::Create(
            run_id,
            RunMetadata {
                source: source.to_string(),
                tags: json!({ "trigger": source }),
            },
        )];
        match book.transition(run_id, RunState::Building, None) {
            Ok(op) => ops.push(op),
            Err(e) => tracing::error!(run_id = %run_id, error = %e, "fresh run refused to build"),
        }

        let cancel = Arc::new(Notify::new());
        book.active = Some(Slot::Run {
            run_id,
            cancel: cancel.clone(),
        });

        METRICS.inc_runs_started();
        obs::emit_run_started(&run_id.to_string(), &source.to_string());

        let span = obs::run_span(&run_id.to_string());
        tokio::spawn(
            self.clone()
                .drive(run_id, source, cancel, ops)
                .instrument(span),
        );
        run_id
    }

    fn release(&self) {
        {
            let mut book = self.book();
            book.active = None;
            if let Some(next) = book.pending.take() {
                self.start_locked(&mut book, next);
            }
        }
        self.bump();
    }

    async fn flush(&self, ops: Vec<LedgerOp>) {
        for op in ops {
            let (run_id, result) = match op {
                LedgerOp::Create(run_id, metadata) => {
                    (run_id, self.inner.ledger.create_run(&run_id, metadata).await)
                }
                LedgerOp::Append(run_id, event) => {
                    (run_id, self.inner.ledger.append_event(&run_id, event).await)
                }
            };
            if let Err(e) = result {
                obs::emit_ledger_error(&run_id.to_string(), &e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run driver
    // -----------------------------------------------------------------------

    async fn drive(self, run_id: RunId, source: SourceRef, cancel: Arc<Notify>, initial: Vec<LedgerOp>) {
        let _release = SlotRelease(self.clone());
        self.flush(initial).await;

        let deploy_failed = self.execute(run_id, &source, &cancel).await;
        if deploy_failed && self.inner.auto_rollback {
            match self.current_artifact() {
                Some(prior) => {
                    if let Err(e) = self.roll_back(run_id, prior).await {
                        tracing::warn!(run_id = %run_id, error = %e, "automatic rollback failed");
                    }
                }
                None => tracing::info!(run_id = %run_id, "no succeeded run to roll back to"),
            }
        }
    }

    /// Move a run from `expected` to `next`. Returns `false` when the run
    /// has left `expected` in the meantime (it was cancelled).
    async fn step(
        &self,
        run_id: RunId,
        expected: RunState,
        next: RunState,
        failure: Option<FailureReason>,
        update: impl FnOnce(&mut PipelineRun),
        extra: Option<(&str, serde_json::Value)>,
    ) -> bool {
        let ops = {
            let mut book = self.book();
            let Some(run) = book.run_mut(&run_id) else {
                return false;
            };
            if run.state != expected {
                return false;
            }
            update(run);
            let mut ops = Vec::new();
            if let Some((kind, payload)) = extra {
                ops.push(book.event(run_id, kind, payload));
            }
            match book.transition(run_id, next, failure) {
                Ok(op) => ops.push(op),
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "transition rejected");
                    return false;
                }
            }
            ops
        };
        self.bump();
        self.flush(ops).await;
        true
    }

    async fn fail(&self, run_id: RunId, expected: RunState, reason: FailureReason) {
        self.step(run_id, expected, RunState::Failed, Some(reason), |_| {}, None)
            .await;
    }

    /// Build, publish and deploy. Returns `true` only when the run failed
    /// during deployment, the one case where the fleet may be mixed.
    async fn execute(&self, run_id: RunId, source: &SourceRef, cancel: &Notify) -> bool {
        let built = tokio::select! {
            _ = cancel.notified() => return false,
            res = tokio::time::timeout(self.inner.build_timeout, self.inner.builder.build(source)) => res,
        };
        let output = match built {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let reason = FailureReason::Build {
                    message: e.to_string(),
                };
                self.fail(run_id, RunState::Building, reason).await;
                return false;
            }
            Err(_) => {
                let reason = FailureReason::Build {
                    message: format!(
                        "build timed out after {}s",
                        self.inner.build_timeout.as_secs()
                    ),
                };
                self.fail(run_id, RunState::Building, reason).await;
                return false;
            }
        };
        tracing::debug!(duration_ms = output.duration_ms, size = output.bytes.len(), "build finished");

        // Register the artifact while still Building.
        let bytes = Arc::new(output.bytes);
        let expected_digest = ContentDigest::from_bytes(&bytes);
        let digest = match self.inner.store.put(&bytes).await {
            Ok(digest) if digest == expected_digest => digest,
            Ok(digest) => {
                let reason = FailureReason::Publish {
                    message: format!(
                        "store returned {} for content hashing to {}",
                        digest.short(),
                        expected_digest.short()
                    ),
                };
                self.fail(run_id, RunState::Building, reason).await;
                return false;
            }
            Err(e) => {
                let reason = FailureReason::Publish {
                    message: e.to_string(),
                };
                self.fail(run_id, RunState::Building, reason).await;
                return false;
            }
        };
        let artifact = Artifact::new(
            digest.clone(),
            self.inner.store.locate(&digest),
            bytes.len() as u64,
        );

        let published = json!({
            "version": artifact.version,
            "location": artifact.location,
            "size": artifact.size,
        });
        let registered = artifact.clone();
        if !self
            .step(
                run_id,
                RunState::Building,
                RunState::Publishing,
                None,
                move |run| run.artifact = Some(registered),
                Some(("artifact_published", published)),
            )
            .await
        {
            return false;
        }
        obs::emit_artifact_published(&run_id.to_string(), artifact.version.as_str(), artifact.size);

        // Read-after-write before anything is deployed.
        match self.inner.store.contains(&digest).await {
            Ok(true) => {}
            Ok(false) => {
                let reason = FailureReason::Publish {
                    message: format!("artifact {} not readable after write", digest.short()),
                };
                self.fail(run_id, RunState::Publishing, reason).await;
                return false;
            }
            Err(e) => {
                let reason = FailureReason::Publish {
                    message: e.to_string(),
                };
                self.fail(run_id, RunState::Publishing, reason).await;
                return false;
            }
        }
        if !self
            .step(
                run_id,
                RunState::Publishing,
                RunState::Deploying,
                None,
                |_| {},
                None,
            )
            .await
        {
            return false;
        }

        let report = self.inner.deployer.deploy(&artifact, bytes).await;
        let summary = deployment_summary(&report.deployment);
        let deployment = report.deployment;
        match report.failure {
            None => {
                self.step(
                    run_id,
                    RunState::Deploying,
                    RunState::Succeeded,
                    None,
                    move |run| run.deployment = Some(deployment),
                    Some(("deployment", summary)),
                )
                .await;
                false
            }
            Some(reason) => {
                self.step(
                    run_id,
                    RunState::Deploying,
                    RunState::Failed,
                    Some(reason),
                    move |run| run.deployment = Some(deployment),
                    Some(("deployment", summary)),
                )
                .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel a run that has not started publishing.
    pub async fn cancel(&self, run_id: RunId, by: &str) -> Result<PipelineRun> {
        let (run, ops) = {
            let mut book = self.book();
            let state = book
                .run(&run_id)
                .map(|r| r.state)
                .ok_or(PipelineError::RunNotFound(run_id))?;
            if !state.is_cancellable() {
                return Err(PipelineError::NotCancellable { run_id, state });
            }
            let op = book.transition(
                run_id,
                RunState::Cancelled,
                Some(FailureReason::Cancelled { by: by.to_string() }),
            )?;
            if let Some(Slot::Run {
                run_id: active,
                cancel,
            }) = &book.active
            {
                if *active == run_id {
                    cancel.notify_one();
                }
            }
            let run = book.run(&run_id).cloned().ok_or(PipelineError::RunNotFound(run_id))?;
            (run, vec![op])
        };
        self.bump();
        self.flush(ops).await;
        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Rollback and reconciliation
    // -----------------------------------------------------------------------

    /// Re-apply the last succeeded artifact to a fresh snapshot on behalf
    /// of a failed run. The run becomes `RolledBack` only if that
    /// deployment succeeds.
    pub async fn rollback(&self, run_id: RunId) -> Result<PipelineRun> {
        let prior = {
            let mut book = self.book();
            let state = book
                .run(&run_id)
                .map(|r| r.state)
                .ok_or(PipelineError::RunNotFound(run_id))?;
            if state != RunState::Failed {
                return Err(PipelineError::NotRollbackable { run_id, state });
            }
            if let Some(slot) = &book.active {
                return Err(PipelineError::Busy {
                    holder: slot.describe(),
                });
            }
            let prior = book.current_artifact().ok_or(PipelineError::NoPriorSuccess)?;
            book.active = Some(Slot::Rollback { run_id });
            prior
        };
        self.bump();

        // The task owns the slot, so a caller that stops waiting cannot
        // release it while members are still being updated.
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let _release = SlotRelease(this.clone());
                this.roll_back(run_id, prior).await
            }
            .instrument(obs::run_span(&run_id.to_string())),
        );
        task.await
            .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
    }

    async fn roll_back(&self, run_id: RunId, prior: Artifact) -> Result<PipelineRun> {
        tracing::info!(run_id = %run_id, artifact = %prior, "rolling back");
        let bytes = self.inner.store.get(&prior.version).await?;
        let report = self.inner.deployer.deploy(&prior, Arc::new(bytes)).await;

        let (run, ops) = {
            let mut book = self.book();
            let run = book
                .run_mut(&run_id)
                .ok_or(PipelineError::RunNotFound(run_id))?;
            run.rollback = Some(report.deployment.clone());
            let mut ops = vec![book.event(
                run_id,
                "rollback",
                json!({
                    "artifact": prior.version,
                    "deployment": deployment_summary(&report.deployment),
                }),
            )];
            if report.failure.is_none() {
                ops.push(book.transition(run_id, RunState::RolledBack, None)?);
            }
            let run = book.run(&run_id).cloned().ok_or(PipelineError::RunNotFound(run_id))?;
            (run, ops)
        };
        self.bump();
        self.flush(ops).await;

        match report.failure {
            None => Ok(run),
            Some(reason) => Err(PipelineError::RollbackFailed { run_id, reason }),
        }
    }

    /// Apply the current artifact to members running anything else.
    pub async fn reconcile(&self) -> Result<Deployment> {
        let current = {
            let mut book = self.book();
            if let Some(slot) = &book.active {
                return Err(PipelineError::Busy {
                    holder: slot.describe(),
                });
            }
            let current = book
                .current_artifact()
                .ok_or(PipelineError::NoCurrentArtifact)?;
            book.active = Some(Slot::Reconcile);
            current
        };
        self.bump();

        let this = self.clone();
        let task = tokio::spawn(async move {
            let _release = SlotRelease(this.clone());
            let bytes = this.inner.store.get(&current.version).await?;
            let report = this.inner.deployer.reconcile(&current, Arc::new(bytes)).await;
            if let Some(reason) = &report.failure {
                tracing::warn!(artifact = %current, reason = %reason, "reconciliation incomplete");
            }
            Ok::<_, PipelineError>(report.deployment)
        });
        task.await
            .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, run_id: &RunId) -> Option<PipelineRun> {
        self.book().run(run_id).cloned()
    }

    /// All runs, oldest first.
    pub fn runs(&self) -> Vec<PipelineRun> {
        self.book().runs.clone()
    }

    /// The run holding the slot, if a run (not a rollback) holds it.
    pub fn active_run(&self) -> Option<PipelineRun> {
        let book = self.book();
        match &book.active {
            Some(Slot::Run { run_id, .. }) => book.run(run_id).cloned(),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<SourceRef> {
        self.book().pending.clone()
    }

    pub fn current_artifact(&self) -> Option<Artifact> {
        self.book().current_artifact()
    }

    pub fn is_idle(&self) -> bool {
        let book = self.book();
        book.active.is_none() && book.pending.is_none()
    }

    /// Wait until the run is terminal.
    pub async fn wait_for_terminal(&self, run_id: RunId) -> Result<PipelineRun> {
        let mut changed = self.inner.changed.subscribe();
        loop {
            let run = self.get(&run_id).ok_or(PipelineError::RunNotFound(run_id))?;
            if run.state.is_terminal() {
                return Ok(run);
            }
            changed.changed().await.ok();
        }
    }

    /// Wait until nothing holds the slot and nothing is queued.
    pub async fn wait_idle(&self) {
        let mut changed = self.inner.changed.subscribe();
        while !self.is_idle() {
            changed.changed().await.ok();
        }
    }
}

fn deployment_summary(deployment: &Deployment) -> serde_json::Value {
    json!({
        "id": deployment.id,
        "artifact": deployment.artifact,
        "status": deployment.status,
        "targets": deployment.targets,
        "outcomes": deployment.outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BuildStep, FakeMember, ScriptedBuilder};
    use shipgate_state::fakes::{MemoryArtifactStore, MemoryRunLedger};

    struct Harness {
        orchestrator: Orchestrator,
        builder: Arc<ScriptedBuilder>,
        store: Arc<MemoryArtifactStore>,
        ledger: Arc<MemoryRunLedger>,
    }

    fn harness(members: usize) -> Harness {
        let fleet = Arc::new(Fleet::new());
        for i in 1..=members {
            fleet.add(Arc::new(FakeMember::new(format!("i-{i}"))));
        }
        let builder = Arc::new(ScriptedBuilder::new());
        let store = Arc::new(MemoryArtifactStore::new());
        let ledger = Arc::new(MemoryRunLedger::new());
        let config = PipelineConfig {
            build_timeout_secs: 60,
            member_timeout_secs: 10,
            health_poll_interval_ms: 100,
            ..PipelineConfig::default()
        };
        let orchestrator = Orchestrator::new(
            &config,
            builder.clone(),
            store.clone(),
            ledger.clone(),
            fleet,
        );
        Harness {
            orchestrator,
            builder,
            store,
            ledger,
        }
    }

    fn started(outcome: TriggerOutcome) -> RunId {
        match outcome {
            TriggerOutcome::Started { run_id } => run_id,
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn push_runs_to_success() {
        let h = harness(2);
        let run_id = started(h.orchestrator.handle_event(&SourceEvent::push("main", "abc123")));
        let run = h.orchestrator.wait_for_terminal(run_id).await.unwrap();

        assert_eq!(run.state, RunState::Succeeded);
        let states: Vec<RunState> = run.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                RunState::Building,
                RunState::Publishing,
                RunState::Deploying,
                RunState::Succeeded
            ]
        );
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.orchestrator.current_artifact(), run.artifact);
        h.orchestrator.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_events_do_not_queue() {
        let h = harness(1);
        let outcome = h.orchestrator.handle_event(&SourceEvent::push("dev", "abc"));
        assert!(matches!(outcome, TriggerOutcome::Ignored { .. }));
        assert!(h.orchestrator.runs().is_empty());
        assert!(h.orchestrator.pending().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn build_failure_is_recorded() {
        let h = harness(1);
        h.builder.push_step(BuildStep::Fail("exit 2".into()));
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let run = h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert!(run.artifact.is_none());
        assert!(matches!(run.failure, Some(FailureReason::Build { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn build_timeout_fails_run() {
        let h = harness(1);
        h.builder.push_step(BuildStep::Hang);
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let run = h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        match run.failure {
            Some(FailureReason::Build { message }) => assert!(message.contains("timed out")),
            other => panic!("expected build timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_fails_from_building() {
        let h = harness(1);
        h.store.set_unavailable(true);
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let run = h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        assert!(matches!(run.failure, Some(FailureReason::Publish { .. })));
        assert_eq!(run.transitions.last().unwrap().from, RunState::Building);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_write_fails_from_publishing() {
        let h = harness(1);
        h.store.set_dropping_writes(true);
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let run = h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        assert!(matches!(run.failure, Some(FailureReason::Publish { .. })));
        assert_eq!(run.transitions.last().unwrap().from, RunState::Publishing);
        assert!(run.deployment.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_building() {
        let h = harness(1);
        h.builder.hold();
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let run = h.orchestrator.cancel(run_id, "alice").await.unwrap();
        assert_eq!(run.state, RunState::Cancelled);
        assert_eq!(
            run.failure,
            Some(FailureReason::Cancelled {
                by: "alice".into()
            })
        );
        h.orchestrator.wait_idle().await;
        assert!(h.store.is_empty());

        let again = h.orchestrator.cancel(run_id, "alice").await.unwrap_err();
        assert!(matches!(again, PipelineError::NotCancellable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_requires_prior_success() {
        let h = harness(1);
        h.builder.push_step(BuildStep::Fail("boom".into()));
        let run_id = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        h.orchestrator.wait_idle().await;

        let err = h.orchestrator.rollback(run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoPriorSuccess));
        assert!(matches!(
            h.orchestrator.reconcile().await.unwrap_err(),
            PipelineError::NoCurrentArtifact
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_while_run_in_flight() {
        let h = harness(1);
        let first = started(h.orchestrator.trigger(SourceRef::manual("ops")));
        h.orchestrator.wait_for_terminal(first).await.unwrap();
        h.orchestrator.wait_idle().await;

        h.builder.hold();
        started(h.orchestrator.trigger(SourceRef::manual("ops")));
        let err = h.orchestrator.reconcile().await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy { .. }));
        h.builder.release();
        h.orchestrator.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_records_every_transition() {
        let h = harness(1);
        let run_id = started(h.orchestrator.trigger(SourceRef::branch("main", "abc")));
        h.orchestrator.wait_for_terminal(run_id).await.unwrap();
        h.orchestrator.wait_idle().await;

        let record = h.ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.metadata.source, "main@abc");
        let events = h.ledger.get_events(&run_id).await.unwrap();
        let transitions = events.iter().filter(|e| e.kind == "transition").count();
        assert_eq!(transitions, 4);
        assert!(events.iter().any(|e| e.kind == "artifact_published"));
        assert!(events.iter().any(|e| e.kind == "deployment"));
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
    }
}
