//! Result aggregation.
//!
//! Merges specialist results into one [`AggregateReport`]: issues are
//! concatenated in result order and deduplicated, and every specialist gets a
//! `by_agent` entry whether it succeeded or not.

use crate::analysis::dedup::dedup;
use crate::models::{AggregateReport, FailureInfo, Issue, Severity, SpecialistResult, Summary};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Merge `results` (already in declared order) into a report.
pub fn aggregate(results: &[SpecialistResult]) -> AggregateReport {
    let mut by_agent = Map::new();
    let mut issues = Vec::new();

    for result in results {
        by_agent.insert(
            result.agent_name.clone(),
            Value::Object(summary_entry(&result.summary, result.error.as_ref())),
        );
        issues.extend(result.issues.iter().cloned());
    }

    let before = issues.len();
    let issues = dedup(issues);
    debug!(
        "Aggregated {} specialists: {} issues, {} after dedup",
        results.len(),
        before,
        issues.len()
    );

    AggregateReport::new(by_agent, issues)
}

/// The specialist's own summary, verbatim, plus `error` when it failed.
pub fn summary_entry(summary: &Summary, error: Option<&FailureInfo>) -> Summary {
    let mut entry = summary.clone();
    if let Some(failure) = error {
        entry.insert("error".to_string(), failure_value(failure));
    }
    entry
}

fn failure_value(failure: &FailureInfo) -> Value {
    let mut map = Map::new();
    map.insert("kind".to_string(), Value::String(failure.kind.to_string()));
    map.insert("message".to_string(), Value::String(failure.message.clone()));
    map.insert("retryable".to_string(), Value::Bool(failure.retryable));
    Value::Object(map)
}

/// Issue counts per severity, most severe first.
pub fn count_by_severity(issues: &[Issue]) -> Vec<(Severity, usize)> {
    let mut counts: BTreeMap<Severity, usize> = BTreeMap::new();
    for issue in issues {
        *counts.entry(issue.severity).or_default() += 1;
    }
    counts.into_iter().rev().collect()
}
