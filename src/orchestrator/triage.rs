//! Sequential triage coordinator.
//!
//! Runs specialists one at a time in declared order. Each specialist sees the
//! summaries of those that ran before it, and a [`TriagePolicy`] may skip or
//! prune the remaining ones based on those summaries. A failure is recorded
//! and the machine moves on.

use crate::agent::SpecialistInvoker;
use crate::analysis::aggregator::summary_entry;
use crate::models::{
    FailureInfo, FailureKind, RunConfig, SkipRule, SpecialistResult, SpecialistSpec,
};
use crate::orchestrator::lint_task;
use crate::scanner::RepositoryContext;
use indicatif::ProgressBar;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageState {
    /// Specialist `i` is next.
    Pending(usize),
    Done,
}

/// What to do with the pending specialist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Run,
    Skip(String),
}

/// Extension point for pruning specialists based on earlier results.
pub trait TriagePolicy: Send + Sync {
    /// Decide whether specialist `index` runs.
    fn step(&self, _index: usize, _specialists: &[SpecialistSpec], _prior: &[SpecialistResult]) -> Step {
        Step::Run
    }

    /// State after specialist `index` has been recorded. Jumping ahead skips
    /// the specialists in between; `Done` skips all remaining ones.
    fn next(&self, index: usize, specialists: &[SpecialistSpec], _prior: &[SpecialistResult]) -> TriageState {
        if index + 1 < specialists.len() {
            TriageState::Pending(index + 1)
        } else {
            TriageState::Done
        }
    }
}

/// Every specialist, in declared order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedOrder;

impl TriagePolicy for FixedOrder {}

/// Skips specialists whose [`SkipRule`] matches an earlier summary.
#[derive(Debug, Default, Clone)]
pub struct SkipRulePolicy {
    rules: Vec<SkipRule>,
}

impl SkipRulePolicy {
    pub fn new(rules: Vec<SkipRule>) -> Self {
        Self { rules }
    }
}

impl TriagePolicy for SkipRulePolicy {
    fn step(&self, index: usize, specialists: &[SpecialistSpec], prior: &[SpecialistResult]) -> Step {
        let name = &specialists[index].name;
        for rule in self.rules.iter().filter(|r| &r.specialist == name) {
            let matched = prior
                .iter()
                .filter(|r| r.agent_name == rule.when && !r.is_failed())
                .any(|r| r.summary.get(&rule.key) == Some(&rule.equals));
            if matched {
                return Step::Skip(format!("{} reported {} = {}", rule.when, rule.key, rule.equals));
            }
        }
        Step::Run
    }
}

/// Summaries of the specialists that already ran, as a prompt section.
fn prior_section(prior: &[SpecialistResult]) -> Option<String> {
    if prior.is_empty() {
        return None;
    }

    let mut summaries = Map::new();
    for result in prior {
        summaries.insert(
            result.agent_name.clone(),
            Value::Object(summary_entry(&result.summary, result.error.as_ref())),
        );
    }
    let rendered = serde_json::to_string(&summaries).unwrap_or_default();
    Some(format!(
        "Summaries from specialists that already ran (use them for context, do not repeat their issues):\n{}",
        rendered
    ))
}

fn task_with_prior(base: &str, prior: &[SpecialistResult]) -> String {
    match prior_section(prior) {
        Some(section) => format!("{}\n\n{}", base, section),
        None => base.to_string(),
    }
}

/// Per-call timeout, shortened to whatever is left before the deadline.
fn remaining(deadline: Option<Instant>, per_agent: Duration) -> Option<Duration> {
    match deadline {
        None => Some(per_agent),
        Some(at) => {
            let left = at.saturating_duration_since(Instant::now());
            (!left.is_zero()).then(|| left.min(per_agent))
        }
    }
}

fn deadline_failure(name: &str) -> SpecialistResult {
    SpecialistResult::failed(
        name,
        FailureInfo::new(FailureKind::Timeout, "run deadline exceeded before the specialist started"),
    )
}

/// Invoke one specialist, aborting the call (retries included) at the deadline.
async fn invoke_before(
    invoker: &SpecialistInvoker,
    spec: &SpecialistSpec,
    task: &str,
    context: Arc<RepositoryContext>,
    deadline: Option<Instant>,
    per_agent: Duration,
) -> SpecialistResult {
    let Some(timeout) = remaining(deadline, per_agent) else {
        return deadline_failure(&spec.name);
    };
    let call = invoker.invoke(spec, task, context, timeout);
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(agent = %spec.name, "Run deadline reached, abandoning specialist");
                SpecialistResult::failed(
                    spec.name.clone(),
                    FailureInfo::new(
                        FailureKind::Timeout,
                        "run deadline exceeded before the specialist finished",
                    ),
                )
            }
        },
        None => call.await,
    }
}

/// Drive the specialists sequentially, then the optional final review.
pub async fn run_triage(
    invoker: &SpecialistInvoker,
    config: &RunConfig,
    context: Arc<RepositoryContext>,
    policy: &dyn TriagePolicy,
    progress: Option<&ProgressBar>,
) -> Vec<SpecialistResult> {
    let specialists = &config.specialists;
    let deadline = config.run_timeout.map(|limit| Instant::now() + limit);
    let base_task = lint_task(&context);
    let mut results: Vec<SpecialistResult> = Vec::with_capacity(specialists.len() + 1);

    let mut state = if specialists.is_empty() {
        TriageState::Done
    } else {
        TriageState::Pending(0)
    };

    while let TriageState::Pending(index) = state {
        let spec = &specialists[index];

        let result = match policy.step(index, specialists, &results) {
            Step::Skip(reason) => {
                info!(agent = %spec.name, "Skipping specialist: {}", reason);
                SpecialistResult::skipped(spec.name.clone(), reason)
            }
            Step::Run => {
                let task = task_with_prior(&base_task, &results);
                invoke_before(invoker, spec, &task, Arc::clone(&context), deadline, config.per_agent_timeout).await
            }
        };
        results.push(result);
        if let Some(bar) = progress {
            bar.inc(1);
            bar.set_message(spec.name.clone());
        }

        state = match policy.next(index, specialists, &results) {
            TriageState::Pending(next) if next <= index || next >= specialists.len() => {
                warn!(
                    "Triage policy returned invalid transition {} -> {}, stopping",
                    index, next
                );
                TriageState::Done
            }
            other => other,
        };

        // Anything jumped over is recorded, never silently omitted.
        let resume = match state {
            TriageState::Pending(next) => next,
            TriageState::Done => specialists.len(),
        };
        for skipped in &specialists[index + 1..resume] {
            results.push(SpecialistResult::skipped(
                skipped.name.clone(),
                "pruned by triage policy",
            ));
        }
    }

    if let Some(ref review) = config.triage.final_review {
        let task = task_with_prior(&base_task, &results);
        let result =
            invoke_before(invoker, review, &task, Arc::clone(&context), deadline, config.per_agent_timeout).await;
        results.push(result);
    }

    results
}
