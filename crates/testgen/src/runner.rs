use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use toolforge_core::{CaseFailure, ExecLimits, Outcome, Property, TestCase, TestVerdict};
use toolforge_sandbox::{SandboxError, SandboxExecutor};
use tracing::{debug, warn};

enum CaseResult {
    Pass,
    Fail(String),
    Skipped,
    Host(SandboxError),
}

struct CaseEval {
    ok: bool,
    observed: String,
    resource_kill: bool,
}

/// Executes synthesized cases against a candidate on a bounded worker
/// pool. Results are merged by case index, so the verdict is deterministic
/// regardless of completion order.
pub struct TestRunner {
    executor: Arc<SandboxExecutor>,
    pool_size: usize,
    resource_kill_budget: usize,
}

impl TestRunner {
    pub fn new(executor: Arc<SandboxExecutor>, pool_size: usize) -> Self {
        Self {
            executor,
            pool_size: pool_size.max(1),
            resource_kill_budget: 3,
        }
    }

    /// How many timed-out / limit-killed cases are tolerated before the
    /// remaining budget is abandoned as clearly unsafe.
    pub fn with_resource_kill_budget(mut self, budget: usize) -> Self {
        self.resource_kill_budget = budget.max(1);
        self
    }

    pub async fn run(
        &self,
        source: &str,
        entry_point: &str,
        cases: &[TestCase],
        limits: &ExecLimits,
    ) -> Result<TestVerdict, SandboxError> {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let kills = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();

        for (idx, case) in cases.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let kills = kills.clone();
            let executor = self.executor.clone();
            let source = source.to_string();
            let entry = entry_point.to_string();
            let limits = *limits;
            let budget = self.resource_kill_budget;

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, CaseResult::Skipped),
                };
                if kills.load(Ordering::Relaxed) >= budget {
                    return (idx, CaseResult::Skipped);
                }

                match evaluate_case(&executor, &source, &entry, &case, &limits).await {
                    Ok(eval) => {
                        if eval.resource_kill {
                            kills.fetch_add(1, Ordering::Relaxed);
                        }
                        if eval.ok {
                            (idx, CaseResult::Pass)
                        } else {
                            (idx, CaseResult::Fail(eval.observed))
                        }
                    }
                    Err(e) => (idx, CaseResult::Host(e)),
                }
            });
        }

        let mut results: Vec<(usize, CaseResult)> = Vec::with_capacity(cases.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => {
                    return Err(SandboxError::Isolation(format!("test worker failed: {}", e)))
                }
            }
        }
        results.sort_by_key(|(idx, _)| *idx);

        let mut failures = Vec::new();
        let mut skipped = 0usize;
        for (idx, result) in results {
            match result {
                CaseResult::Pass => {}
                CaseResult::Fail(observed) => failures.push(CaseFailure {
                    case: cases[idx].clone(),
                    observed,
                }),
                CaseResult::Skipped => skipped += 1,
                CaseResult::Host(e) => return Err(e),
            }
        }

        if skipped > 0 {
            warn!(
                "Abandoned {} case(s) for {} after repeated resource kills",
                skipped, entry_point
            );
        }
        debug!(
            "Verdict for {}: {}/{} case(s) failed",
            entry_point,
            failures.len(),
            cases.len()
        );

        if failures.is_empty() && skipped == 0 {
            Ok(TestVerdict::passed())
        } else {
            Ok(TestVerdict::failed(failures))
        }
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Returned(value) => {
            let mut text = value.to_string();
            if text.len() > 200 {
                text.truncate(200);
                text.push_str("...");
            }
            format!("returned {}", text)
        }
        Outcome::Faulted { kind, message } => format!("faulted: {}: {}", kind, message),
        Outcome::TimedOut => "timed out".to_string(),
        Outcome::LimitExceeded => "resource limit exceeded".to_string(),
    }
}

async fn evaluate_case(
    executor: &SandboxExecutor,
    source: &str,
    entry: &str,
    case: &TestCase,
    limits: &ExecLimits,
) -> Result<CaseEval, SandboxError> {
    let first = executor.execute(source, entry, &case.inputs, limits).await?;
    let resource_kill = first.is_resource_kill();

    let eval = match &case.property {
        Property::NoFault => CaseEval {
            ok: matches!(first, Outcome::Returned(_)),
            observed: describe(&first),
            resource_kill,
        },
        Property::ReturnsShape(shape) => {
            let ok = matches!(&first, Outcome::Returned(value) if shape.matches(value));
            CaseEval {
                ok,
                observed: describe(&first),
                resource_kill,
            }
        }
        Property::Deterministic => {
            if !matches!(first, Outcome::Returned(_)) {
                CaseEval {
                    ok: false,
                    observed: describe(&first),
                    resource_kill,
                }
            } else {
                let second = executor.execute(source, entry, &case.inputs, limits).await?;
                let ok = first == second;
                CaseEval {
                    ok,
                    observed: if ok {
                        describe(&first)
                    } else {
                        format!("{} then {}", describe(&first), describe(&second))
                    },
                    resource_kill: resource_kill || second.is_resource_kill(),
                }
            }
        }
    };

    Ok(eval)
}
