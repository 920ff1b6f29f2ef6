//! Parallel fan-out/fan-in runner.
//!
//! One task per specialist, at most `max_concurrency` in flight. Results come
//! back in declared order no matter which call finishes first.

use crate::agent::SpecialistInvoker;
use crate::models::{FailureInfo, FailureKind, RunConfig, SpecialistResult};
use crate::orchestrator::lint_task;
use crate::scanner::RepositoryContext;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Run every specialist concurrently. Never fails; each specialist's
/// failure is recorded in its own result.
pub async fn run_parallel(
    invoker: &SpecialistInvoker,
    config: &RunConfig,
    context: Arc<RepositoryContext>,
    progress: Option<&ProgressBar>,
) -> Vec<SpecialistResult> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let deadline = config.run_timeout.map(|limit| Instant::now() + limit);
    let task = lint_task(&context);

    let handles: Vec<_> = config
        .specialists
        .iter()
        .cloned()
        .map(|spec| {
            let invoker = invoker.clone();
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.cloned();
            let task = task.clone();
            let timeout = config.per_agent_timeout;

            tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(agent = %spec.name, "Specialist started");

                let result = invoker.invoke(&spec, &task, context, timeout).await;
                if let Some(bar) = progress {
                    bar.inc(1);
                    bar.set_message(spec.name.clone());
                }
                result
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (spec, mut handle) in config.specialists.iter().zip(handles) {
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    warn!(agent = %spec.name, "Run deadline reached, abandoning specialist");
                    results.push(SpecialistResult::failed(
                        spec.name.clone(),
                        FailureInfo::new(
                            FailureKind::Timeout,
                            "run deadline exceeded before the specialist finished",
                        ),
                    ));
                    continue;
                }
            },
            None => handle.await,
        };

        let result = joined.unwrap_or_else(|e| {
            error!(agent = %spec.name, "Specialist task panicked or was cancelled: {}", e);
            SpecialistResult::failed(
                spec.name.clone(),
                FailureInfo::new(FailureKind::Unknown, format!("specialist task failed: {}", e)),
            )
        });
        results.push(result);
    }

    results
}
