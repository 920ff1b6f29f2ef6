//! Specialist invocation.
//!
//! The invoker is the only place that talks to the [`ReasoningBackend`]. It
//! applies the per-call timeout, retries retryable failures once with
//! backoff, and validates raw model output against the issue schema so that
//! malformed output never reaches aggregation.

use crate::agent::backend::{ReasoningBackend, SpecialistRequest};
use crate::error::BackendError;
use crate::models::{FailureInfo, FailureKind, Issue, Severity, SpecialistResult, SpecialistSpec, Summary};
use crate::scanner::RepositoryContext;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A retryable failure gets exactly one more attempt.
const MAX_RETRIES: u32 = 1;

/// Backoff between the first failure and the retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential in the attempt number; a server `Retry-After` wins.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponential = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        hint.unwrap_or(exponential).min(self.max_backoff)
    }
}

/// Calls specialists and adapts their output into [`SpecialistResult`]s.
#[derive(Clone)]
pub struct SpecialistInvoker {
    backend: Arc<dyn ReasoningBackend>,
    retry: RetryPolicy,
}

impl SpecialistInvoker {
    pub fn new(backend: Arc<dyn ReasoningBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Invoke one specialist. Never fails: problems land in `result.error`.
    pub async fn invoke(
        &self,
        spec: &SpecialistSpec,
        task: &str,
        context: Arc<RepositoryContext>,
        timeout: Duration,
    ) -> SpecialistResult {
        let started = Instant::now();
        let result = match self.call_raw(spec, task, context, timeout).await {
            Ok(raw) => parse_specialist_output(&spec.name, &raw),
            Err(failure) => SpecialistResult::failed(spec.name.clone(), failure),
        };

        match result.error {
            Some(ref failure) => warn!(
                agent = %spec.name,
                kind = %failure.kind,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Specialist failed: {}",
                failure.message
            ),
            None => info!(
                agent = %spec.name,
                issues = result.issues.len(),
                dropped = result.dropped_issues,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Specialist finished"
            ),
        }

        result
    }

    /// Call the backend and return its raw text, applying timeout and retry.
    pub async fn call_raw(
        &self,
        spec: &SpecialistSpec,
        task: &str,
        context: Arc<RepositoryContext>,
        timeout: Duration,
    ) -> Result<String, FailureInfo> {
        check_inputs(spec, &context, timeout)?;

        let request = SpecialistRequest {
            agent_name: spec.name.clone(),
            model: spec.model.clone(),
            instructions: spec.instructions.clone(),
            task: task.to_string(),
            tools: spec.tools.clone(),
            context,
            timeout,
        };

        let mut attempt = 0;
        loop {
            // Dropping the in-flight call on expiry is the cancellation.
            let outcome = match tokio::time::timeout(timeout, self.backend.call(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };

            let err = match outcome {
                Ok(raw) => return Ok(raw),
                Err(err) => err,
            };

            let mut failure = FailureInfo::from(&err);
            if failure.retryable && attempt < MAX_RETRIES {
                let delay = self.retry.delay_for(attempt, err.retry_after());
                warn!(
                    agent = %spec.name,
                    attempt = attempt + 1,
                    "Retryable failure ({}), retrying in {}ms",
                    failure.kind,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if attempt > 0 {
                failure.message = format!("{} (after {} retry)", failure.message, attempt);
            }
            return Err(failure);
        }
    }
}

fn check_inputs(
    spec: &SpecialistSpec,
    context: &RepositoryContext,
    timeout: Duration,
) -> Result<(), FailureInfo> {
    let problem = if spec.name.trim().is_empty() {
        Some("agent name must not be empty".to_string())
    } else if timeout.is_zero() {
        Some("timeout must be positive".to_string())
    } else if !context.is_resolvable() {
        Some(format!(
            "repository root does not exist: {}",
            context.root.display()
        ))
    } else {
        None
    };

    match problem {
        Some(message) => Err(FailureInfo::new(
            FailureKind::Unknown,
            format!("invalid invocation: {}", message),
        )),
        None => Ok(()),
    }
}

/// Issue entry as a model emits it, before validation. Recommendation fields
/// are not read: only the enrichment pass may set them.
#[derive(Debug, Deserialize)]
struct RawIssue {
    rule: Option<String>,
    path: Option<String>,
    line_start: Option<u32>,
    line_end: Option<u32>,
    severity: Option<String>,
    message: Option<String>,
}

impl TryFrom<RawIssue> for Issue {
    type Error = String;

    fn try_from(raw: RawIssue) -> Result<Self, Self::Error> {
        let rule = raw
            .rule
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or("missing rule")?;
        let path = raw.path.ok_or("missing path")?;
        let message = raw
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or("missing message")?;

        let severity = match raw.severity {
            None => Severity::default(),
            Some(ref s) => Severity::parse_lenient(s).ok_or_else(|| format!("unknown severity {:?}", s))?,
        };

        // 0 means "unknown line" in practice.
        let mut line_start = raw.line_start.filter(|&l| l > 0);
        let mut line_end = raw.line_end.filter(|&l| l > 0);
        match (line_start, line_end) {
            (Some(start), Some(end)) if end < start => {
                return Err(format!("line_end {} before line_start {}", end, start));
            }
            (None, Some(end)) => {
                line_start = Some(end);
                line_end = None;
            }
            _ => {}
        }

        Ok(Issue {
            rule,
            path,
            line_start,
            line_end,
            severity,
            message,
            recommendation: None,
            code_suggestion: None,
        })
    }
}

/// Locate the JSON object inside model text, tolerating code fences and
/// chatter around it.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Adapt raw specialist output into a validated result.
pub fn parse_specialist_output(agent_name: &str, raw: &str) -> SpecialistResult {
    let value: Value = match extract_json_object(raw).map(serde_json::from_str) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return SpecialistResult::failed(
                agent_name,
                FailureInfo::new(FailureKind::InvalidOutput, format!("output is not valid JSON: {}", e)),
            )
        }
        None => {
            return SpecialistResult::failed(
                agent_name,
                FailureInfo::new(FailureKind::InvalidOutput, "output contains no JSON object"),
            )
        }
    };

    let Value::Object(mut obj) = value else {
        return SpecialistResult::failed(
            agent_name,
            FailureInfo::new(FailureKind::InvalidOutput, "output is not a JSON object"),
        );
    };

    let summary = match obj.remove("summary") {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Summary::new(),
        Some(other) => {
            let mut map = Summary::new();
            map.insert("text".to_string(), other);
            map
        }
    };

    let entries = match obj.remove("issues") {
        Some(Value::Array(entries)) => entries,
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            let mut result = SpecialistResult::success(agent_name, summary, Vec::new());
            result.error = Some(FailureInfo::new(
                FailureKind::InvalidOutput,
                "`issues` is not an array",
            ));
            return result;
        }
    };

    let total = entries.len();
    let mut issues = Vec::with_capacity(total);
    for entry in entries {
        let validated = serde_json::from_value::<RawIssue>(entry)
            .map_err(|e| e.to_string())
            .and_then(Issue::try_from);
        match validated {
            Ok(issue) => issues.push(issue),
            Err(reason) => debug!(agent = %agent_name, "Dropping invalid issue: {}", reason),
        }
    }

    let dropped = total - issues.len();
    if dropped > 0 {
        warn!(agent = %agent_name, "Dropped {} of {} issues that failed validation", dropped, total);
    }

    let mut result = SpecialistResult::success(agent_name, summary, issues);
    result.dropped_issues = dropped;
    result
}
