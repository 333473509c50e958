use crate::audit::AuditSink;
use crate::config::NodeConfig;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use toolforge_core::{
    Candidate, ExecLimits, Origin, Outcome, PipelineError, ToolRecord, ValidationFinding,
    ValidationReport,
};
use toolforge_gossip::{Announcement, Broadcaster};
use toolforge_registry::{RegistryError, ToolRegistry};
use toolforge_sandbox::{SandboxError, SandboxExecutor};
use toolforge_testgen::{TestRunner, TestSynthesizer};
use toolforge_validator::{entry_point_defined, validate, RuleSet};
use tracing::{info, warn};

fn reg_err(e: RegistryError) -> PipelineError {
    match e {
        RegistryError::DuplicateName(name) => PipelineError::DuplicateName(name),
        RegistryError::Conflict(name) => PipelineError::Conflict(name),
        RegistryError::NotFound(name) => PipelineError::NotFound(name),
        RegistryError::LockTimeout(name) => PipelineError::Conflict(name),
        other => PipelineError::Registry(other.to_string()),
    }
}

// Host-side sandbox failures mean the isolation boundary is gone; the run
// aborts rather than degrading.
fn sandbox_err(e: SandboxError) -> PipelineError {
    PipelineError::Isolation(e.to_string())
}

fn base_seed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

struct InflightRun {
    id: u64,
    handle: AbortHandle,
}

/// Drives a candidate through static screening, sandboxed property tests
/// and registry commit. Local results are announced to peers; peer-received
/// candidates take the same path but are only registered if they survive
/// local revalidation.
pub struct Pipeline {
    registry: Arc<ToolRegistry>,
    executor: Arc<SandboxExecutor>,
    rules: Arc<RuleSet>,
    synthesizer: TestSynthesizer,
    runner: TestRunner,
    broadcaster: Broadcaster,
    audit: Arc<dyn AuditSink>,
    limits: ExecLimits,
    peer_id: String,
    inflight: Mutex<HashMap<String, InflightRun>>,
    next_run_id: AtomicU64,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<SandboxExecutor>,
        rules: Arc<RuleSet>,
        broadcaster: Broadcaster,
        audit: Arc<dyn AuditSink>,
        peer_id: String,
        config: &NodeConfig,
    ) -> Self {
        Self {
            synthesizer: TestSynthesizer::new(config.max_cases),
            runner: TestRunner::new(executor.clone(), config.pool_size)
                .with_resource_kill_budget(config.resource_kill_budget),
            registry,
            executor,
            rules,
            broadcaster,
            audit,
            limits: config.limits,
            peer_id,
            inflight: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Validate and register a fresh candidate. Fails with DuplicateName if
    /// an Active tool already owns the name.
    pub async fn process(
        self: Arc<Self>,
        candidate: Candidate,
        origin: Origin,
    ) -> Result<ToolRecord, PipelineError> {
        self.launch(candidate, origin, false).await
    }

    /// Explicit update request: cancel any in-flight run for the name,
    /// discard its partial results and revalidate the new candidate from
    /// scratch.
    pub async fn supersede(
        self: Arc<Self>,
        candidate: Candidate,
    ) -> Result<ToolRecord, PipelineError> {
        self.launch(candidate, Origin::Local, true).await
    }

    async fn launch(
        self: Arc<Self>,
        candidate: Candidate,
        origin: Origin,
        replace: bool,
    ) -> Result<ToolRecord, PipelineError> {
        let name = candidate.name.clone();
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);

        if replace {
            let mut inflight = self.inflight.lock().await;
            if let Some(run) = inflight.remove(&name) {
                run.handle.abort();
                warn!("Superseding in-flight pipeline run for {}", name);
            }
        }

        let this = self.clone();
        let task = tokio::spawn(async move { this.run(candidate, origin, replace).await });
        {
            let mut inflight = self.inflight.lock().await;
            inflight.insert(
                name.clone(),
                InflightRun {
                    id: run_id,
                    handle: task.abort_handle(),
                },
            );
        }

        let result = task.await;

        {
            let mut inflight = self.inflight.lock().await;
            if inflight.get(&name).map(|r| r.id == run_id).unwrap_or(false) {
                inflight.remove(&name);
            }
        }

        match result {
            Ok(inner) => inner,
            Err(e) if e.is_cancelled() => {
                info!("Pipeline run for {} was superseded", name);
                Err(PipelineError::Cancelled(name))
            }
            Err(e) => Err(PipelineError::Isolation(format!(
                "pipeline task failed: {}",
                e
            ))),
        }
    }

    async fn run(
        &self,
        candidate: Candidate,
        origin: Origin,
        replace: bool,
    ) -> Result<ToolRecord, PipelineError> {
        let name = candidate.name.clone();
        info!("Processing candidate {} ({:?})", name, origin);

        let _lock = self.registry.lock_name(&name).await.map_err(reg_err)?;
        let local = origin.is_local();

        // Local submissions are visible as Pending while the pipeline
        // runs. Peer candidates only enter the registry once they survive
        // local revalidation; until then they are nothing but input.
        if local {
            if replace {
                self.registry
                    .replace(&candidate, origin.clone())
                    .await
                    .map_err(reg_err)?;
            } else {
                self.registry
                    .submit(&candidate, origin.clone())
                    .await
                    .map_err(reg_err)?;
            }
        } else if let Some(existing) = self.registry.get(&name).await {
            if existing.is_active() {
                return Err(PipelineError::DuplicateName(name));
            }
        }

        let mut findings = validate(&candidate.source, &self.rules);
        if !entry_point_defined(&candidate.source, &name) {
            findings.push(ValidationFinding::block(
                "syntax/entry-point",
                None,
                format!("no top-level function named {}", name),
            ));
        }
        let mut report = ValidationReport::from_findings(findings);

        if report.has_blocker() {
            if local {
                self.registry
                    .reject(&name, report.clone())
                    .await
                    .map_err(reg_err)?;
            }
            self.audit_decision(&name, &origin, "reject-static", &report)
                .await;
            return Err(PipelineError::ValidationBlocked(report.findings));
        }
        if local {
            self.registry
                .mark_validated(&name, report.clone())
                .await
                .map_err(reg_err)?;
        }

        let cases = self
            .synthesizer
            .synthesize(&candidate.signature, base_seed(&name));
        let verdict = self
            .runner
            .run(&candidate.source, &name, &cases, &self.limits)
            .await
            .map_err(sandbox_err)?;
        report.verdict = Some(verdict.clone());

        if !verdict.passed {
            if local {
                self.registry
                    .reject(&name, report.clone())
                    .await
                    .map_err(reg_err)?;
            }
            self.audit_decision(&name, &origin, "reject-tests", &report)
                .await;
            return Err(PipelineError::TestFailure(verdict));
        }

        if !local {
            self.registry
                .submit(&candidate, origin.clone())
                .await
                .map_err(reg_err)?;
            self.registry
                .mark_validated(&name, report.clone())
                .await
                .map_err(reg_err)?;
        }
        let record = self
            .registry
            .promote(&name, report.clone())
            .await
            .map_err(reg_err)?;
        self.audit_decision(&name, &origin, "promote", &report).await;

        // Peer-merged tools are not re-announced.
        if local {
            let announcement =
                Announcement::for_record(&record, &candidate.signature, &self.peer_id);
            self.broadcaster.announce(&announcement).await;
        }

        Ok(record)
    }

    /// Run an Active tool against real arguments, under the same limits the
    /// validation pipeline used.
    pub async fn invoke(&self, name: &str, args: &[Value]) -> Result<Outcome, PipelineError> {
        let record = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))?;
        if !record.is_active() {
            return Err(PipelineError::NotActive(name.to_string()));
        }

        let outcome = self
            .executor
            .execute(&record.source, name, args, &self.limits)
            .await
            .map_err(sandbox_err)?;

        self.audit
            .record(json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "event": "invoke",
                "tool": name,
                "outcome": outcome,
            }))
            .await;

        Ok(outcome)
    }

    async fn audit_decision(
        &self,
        name: &str,
        origin: &Origin,
        decision: &str,
        report: &ValidationReport,
    ) {
        self.audit
            .record(json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "event": "decision",
                "tool": name,
                "origin": origin,
                "decision": decision,
                "report": report,
            }))
            .await;
    }
}
