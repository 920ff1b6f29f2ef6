//! Orchestration engine.
//!
//! Validates the run, executes the specialists in the configured mode,
//! aggregates their results, and runs the enrichment pass. The phases are
//! strictly ordered: enrichment starts only after aggregation completes.

pub mod enrich;
pub mod parallel;
pub mod triage;

use crate::agent::{ReasoningBackend, RetryPolicy, SpecialistInvoker};
use crate::analysis::aggregate;
use crate::error::{OrchestratorError, Result};
use crate::models::{AggregateReport, ExecutionMode, RunConfig, SpecialistResult};
use crate::scanner::RepositoryContext;
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub use enrich::EnrichmentStats;
pub use triage::{FixedOrder, SkipRulePolicy, TriagePolicy};

/// Base task every specialist receives.
pub(crate) fn lint_task(context: &RepositoryContext) -> String {
    format!(
        "Lint the repository at {} ({} indexed source files). \
         Use your tools to inspect it and report issues in the required JSON format.",
        context.root.display(),
        context.files.len()
    )
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: AggregateReport,
    /// Per-specialist results in declared order.
    pub results: Vec<SpecialistResult>,
    pub enrichment: Option<EnrichmentStats>,
    /// Name of the final-review specialist, if one ran.
    final_review: Option<String>,
}

impl RunOutcome {
    /// True when every executed specialist failed and none of the failures
    /// was transient. Skipped specialists and the final review do not count.
    /// This is the only fatal outcome of a completed run.
    pub fn all_failed_permanently(&self) -> bool {
        let mut executed = self
            .results
            .iter()
            .filter(|r| !r.is_skipped())
            .filter(|r| self.final_review.as_deref() != Some(r.agent_name.as_str()))
            .peekable();
        executed.peek().is_some() && executed.all(|r| r.error.as_ref().is_some_and(|e| !e.retryable))
    }
}

/// Runs one lint pass over a repository.
pub struct Orchestrator {
    invoker: SpecialistInvoker,
    config: Arc<RunConfig>,
    policy: Arc<dyn TriagePolicy>,
    progress: Option<ProgressBar>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ReasoningBackend>, config: Arc<RunConfig>) -> Self {
        let retry = RetryPolicy {
            initial_backoff: config.retry_backoff,
            ..RetryPolicy::default()
        };
        let policy: Arc<dyn TriagePolicy> = if config.triage.skip_rules.is_empty() {
            Arc::new(FixedOrder)
        } else {
            Arc::new(SkipRulePolicy::new(config.triage.skip_rules.clone()))
        };

        Self {
            invoker: SpecialistInvoker::new(backend, retry),
            config,
            policy,
            progress: None,
        }
    }

    /// Report finished specialists on `bar`.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Execute the run. Only configuration problems are errors; specialist
    /// failures end up in the report.
    pub async fn run(&self, context: Arc<RepositoryContext>) -> Result<RunOutcome> {
        let config = &self.config;
        config.validate()?;
        if !context.is_resolvable() {
            return Err(OrchestratorError::Context(format!(
                "repository root is not a directory: {}",
                context.root.display()
            )));
        }

        let started = Instant::now();
        info!(
            "Running {} specialists in {} mode (max_concurrency={})",
            config.specialists.len(),
            config.mode,
            config.max_concurrency
        );
        for spec in &config.specialists {
            debug!(agent = %spec.name, model = %spec.model, "{}", spec.description);
        }
        if let Some(ref bar) = self.progress {
            let extra = usize::from(config.mode == ExecutionMode::Triage && config.triage.final_review.is_some());
            bar.set_length((config.specialists.len() + extra) as u64);
        }

        let results = match config.mode {
            ExecutionMode::Parallel => {
                parallel::run_parallel(&self.invoker, config, Arc::clone(&context), self.progress.as_ref()).await
            }
            ExecutionMode::Triage => {
                triage::run_triage(
                    &self.invoker,
                    config,
                    Arc::clone(&context),
                    self.policy.as_ref(),
                    self.progress.as_ref(),
                )
                .await
            }
        };

        let mut report = aggregate(&results);

        let enrichment = match config.enrichment {
            Some(ref enrichment) => {
                if let Some(ref bar) = self.progress {
                    bar.set_message("recommendations");
                }
                Some(
                    enrich::enrich(
                        &self.invoker,
                        &mut report,
                        enrichment,
                        Arc::clone(&context),
                        config.per_agent_timeout,
                        config.max_concurrency,
                    )
                    .await,
                )
            }
            None => None,
        };

        if let Some(ref bar) = self.progress {
            bar.finish_and_clear();
        }

        let failed = results.iter().filter(|r| r.is_failed()).count();
        info!(
            "Run finished in {:.1}s: {} issues, {} of {} specialists failed",
            started.elapsed().as_secs_f64(),
            report.total_issues,
            failed,
            results.len()
        );

        let final_review = match config.mode {
            ExecutionMode::Triage => config.triage.final_review.as_ref().map(|r| r.name.clone()),
            ExecutionMode::Parallel => None,
        };

        Ok(RunOutcome {
            report,
            results,
            enrichment,
            final_review,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::backend::testing::{context, output, spec, ScriptedBackend};
    use crate::error::BackendError;
    use crate::models::{EnrichmentConfig, EnrichmentFilter, FailureKind};
    use serde_json::json;
    use std::time::Duration;

    fn config(mode: ExecutionMode, names: &[&str]) -> RunConfig {
        let mut config = RunConfig::new(mode, names.iter().map(|n| spec(n)).collect());
        config.per_agent_timeout = Duration::from_secs(5);
        config.retry_backoff = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_two_agents_with_shared_duplicate() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply(
                    "A",
                    output(
                        json!({"files": 2}),
                        &[("bare_except", "a.py", 10, "Bare except"), ("long_function", "b.py", 1, "Too long")],
                    ),
                )
                .reply("B", output(json!({"files": 2}), &[("bare_except", "a.py", 10, "Bare except")])),
        );
        let mut config = config(ExecutionMode::Parallel, &["A", "B"]);
        config.max_concurrency = 2;

        let outcome = Orchestrator::new(backend, Arc::new(config))
            .run(context())
            .await
            .unwrap();

        assert_eq!(outcome.report.total_issues, 2);
        assert!(outcome.report.by_agent["A"].get("error").is_none());
        assert!(outcome.report.by_agent["B"].get("error").is_none());
        assert!(outcome.enrichment.is_none());
        assert!(!outcome.all_failed_permanently());
    }

    #[tokio::test]
    async fn test_empty_specialists_is_configuration_failure() {
        let backend = Arc::new(ScriptedBackend::new());
        let result = Orchestrator::new(backend.clone(), Arc::new(config(ExecutionMode::Parallel, &[])))
            .run(context())
            .await;
        assert!(matches!(result, Err(OrchestratorError::Configuration(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_root_aborts_before_calls() {
        let backend = Arc::new(ScriptedBackend::new().reply("A", output(json!({}), &[])));
        let mut ctx = (*context()).clone();
        ctx.root = ctx.root.join("swarmlint-definitely-missing-dir");

        let result = Orchestrator::new(backend.clone(), Arc::new(config(ExecutionMode::Parallel, &["A"])))
            .run(Arc::new(ctx))
            .await;
        assert!(matches!(result, Err(OrchestratorError::Context(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_runs_after_aggregation() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply("A", output(json!({}), &[("r", "a.py", 3, "m")]))
                .reply("B", output(json!({}), &[("r", "a.py", 3, "m")]))
                .reply(
                    "recommendations",
                    json!({"recommendations": [{"id": 0, "rule": "r", "path": "a.py", "text": "fix it"}]}).to_string(),
                ),
        );
        let mut config = config(ExecutionMode::Triage, &["A", "B"]);
        config.enrichment = Some(EnrichmentConfig {
            recommender: spec("recommendations"),
            filter: EnrichmentFilter::default(),
            batch_size: 20,
        });

        let outcome = Orchestrator::new(backend.clone(), Arc::new(config))
            .run(context())
            .await
            .unwrap();

        assert_eq!(backend.call_names(), vec!["A", "B", "recommendations"]);
        // Deduplicated before enrichment, so only one issue was sent.
        assert!(backend.calls()[2].task.contains("\"id\":0"));
        assert!(!backend.calls()[2].task.contains("\"id\":1"));
        assert_eq!(outcome.report.total_issues, 1);
        assert_eq!(outcome.report.recommendations, 1);
        assert_eq!(outcome.enrichment.map(|s| s.enriched), Some(1));
        let keys: Vec<_> = outcome.report.by_agent.keys().cloned().collect();
        assert_eq!(keys, vec!["A", "B", "recommendations"]);
    }

    #[tokio::test]
    async fn test_all_failed_outcome() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail("A", BackendError::InvalidResponse("no choices".into()))
                .fail(
                    "B",
                    BackendError::Tool {
                        tool: "search_code".into(),
                        message: "bad pattern".into(),
                    },
                ),
        );
        let outcome = Orchestrator::new(backend, Arc::new(config(ExecutionMode::Parallel, &["A", "B"])))
            .run(context())
            .await
            .unwrap();

        assert_eq!(outcome.report.total_issues, 0);
        assert_eq!(outcome.report.failed_agents(), vec!["A", "B"]);
        assert!(outcome.all_failed_permanently());
    }

    #[tokio::test]
    async fn test_transient_failures_are_not_fatal() {
        let backend = Arc::new(ScriptedBackend::new().fail(
            "A",
            BackendError::RateLimited {
                message: "slow down".into(),
                retry_after: Some(Duration::from_millis(1)),
            },
        ));
        let outcome = Orchestrator::new(backend, Arc::new(config(ExecutionMode::Parallel, &["A"])))
            .run(context())
            .await
            .unwrap();

        assert_eq!(outcome.results[0].error.as_ref().map(|e| e.kind), Some(FailureKind::RateLimited));
        assert!(!outcome.all_failed_permanently());
    }

    #[tokio::test]
    async fn test_skip_rules_from_config_are_applied() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply("structure", output(json!({"has_tests": false}), &[]))
                .reply("testing", output(json!({}), &[])),
        );
        let mut config = config(ExecutionMode::Triage, &["structure", "testing"]);
        config.triage.skip_rules = vec![crate::models::SkipRule {
            specialist: "testing".into(),
            when: "structure".into(),
            key: "has_tests".into(),
            equals: json!(false),
        }];

        let outcome = Orchestrator::new(backend.clone(), Arc::new(config))
            .run(context())
            .await
            .unwrap();
        assert_eq!(backend.call_names(), vec!["structure"]);
        assert_eq!(outcome.report.by_agent["testing"]["skipped"], true);
    }

    #[tokio::test]
    async fn test_only_enricher_sets_recommendations() {
        let specialist_output = json!({
            "summary": {},
            "issues": [{"rule": "r", "path": "a.py", "line_start": 3, "message": "m", "recommendation": "self-made"}]
        })
        .to_string();

        let backend = Arc::new(ScriptedBackend::new().reply("A", specialist_output.clone()));
        let outcome = Orchestrator::new(backend, Arc::new(config(ExecutionMode::Parallel, &["A"])))
            .run(context())
            .await
            .unwrap();
        assert_eq!(outcome.report.recommendations, 0);
        assert_eq!(outcome.report.issues[0].recommendation, None);

        let backend = Arc::new(
            ScriptedBackend::new().reply("A", specialist_output).reply(
                "recommendations",
                json!({"recommendations": [{"id": 0, "rule": "r", "path": "a.py", "text": "from enricher"}]})
                    .to_string(),
            ),
        );
        let mut config = config(ExecutionMode::Parallel, &["A"]);
        config.enrichment = Some(EnrichmentConfig {
            recommender: spec("recommendations"),
            filter: EnrichmentFilter::default(),
            batch_size: 20,
        });
        let outcome = Orchestrator::new(backend, Arc::new(config)).run(context()).await.unwrap();
        assert_eq!(outcome.report.recommendations, 1);
        assert_eq!(outcome.report.issues[0].recommendation.as_deref(), Some("from enricher"));
    }

    #[tokio::test]
    async fn test_fatal_ignores_skipped_and_final_review() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail("structure", BackendError::InvalidResponse("no choices".into()))
                .reply("review", output(json!({"verdict": "ok"}), &[])),
        );
        let mut config = config(ExecutionMode::Triage, &["structure", "testing"]);
        config.triage.final_review = Some(spec("review"));

        struct SkipSecond;
        impl TriagePolicy for SkipSecond {
            fn step(&self, index: usize, _: &[crate::models::SpecialistSpec], _: &[SpecialistResult]) -> triage::Step {
                if index == 1 {
                    triage::Step::Skip("not needed".into())
                } else {
                    triage::Step::Run
                }
            }
        }
        let mut orchestrator = Orchestrator::new(backend.clone(), Arc::new(config));
        orchestrator.policy = Arc::new(SkipSecond);

        let outcome = orchestrator.run(context()).await.unwrap();
        assert_eq!(backend.call_names(), vec!["structure", "review"]);
        assert!(outcome.results[1].is_skipped());
        assert!(!outcome.results[2].is_failed());
        assert!(outcome.all_failed_permanently());
    }
}
