//! Recommendation enrichment.
//!
//! After aggregation, a bounded subset of issues is sent to the recommender
//! in batches. Each issue carries its index in the report as `id`; replies
//! are matched back by that id (or by `(rule, path, line_start)` within the
//! batch), never by position. A failed batch leaves its issues untouched.

use crate::agent::invoker::extract_json_object;
use crate::agent::SpecialistInvoker;
use crate::analysis::aggregator::summary_entry;
use crate::models::{
    AggregateReport, EnrichmentConfig, FailureInfo, FailureKind, Issue, IssueKey, Summary,
};
use crate::scanner::RepositoryContext;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters for one enrichment pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub selected: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub enriched: usize,
}

#[derive(Debug, Deserialize)]
struct Recommendation {
    id: Option<usize>,
    rule: Option<String>,
    path: Option<String>,
    line_start: Option<u32>,
    #[serde(alias = "recommendation")]
    text: Option<String>,
    code_suggestion: Option<String>,
}

impl Recommendation {
    fn key(&self) -> Option<IssueKey> {
        Some(IssueKey {
            rule: self.rule.clone()?,
            path: self.path.clone()?,
            line_start: self.line_start.filter(|&l| l > 0),
        })
    }

    /// An id is only trusted when the echoed rule/path agree with the issue.
    fn agrees_with(&self, issue: &Issue) -> bool {
        self.rule.as_ref().map_or(true, |r| *r == issue.rule)
            && self.path.as_ref().map_or(true, |p| *p == issue.path)
    }
}

fn batch_payload(issues: &[Issue], batch: &[usize]) -> String {
    let entries: Vec<Value> = batch
        .iter()
        .map(|&id| {
            let issue = &issues[id];
            json!({
                "id": id,
                "rule": issue.rule,
                "path": issue.path,
                "line_start": issue.line_start,
                "line_end": issue.line_end,
                "severity": issue.severity,
                "message": issue.message,
            })
        })
        .collect();
    format!(
        "Write recommendations for these lint issues. Echo each issue's id.\n{}",
        json!({ "issues": entries })
    )
}

fn parse_recommendations(raw: &str) -> Result<Vec<Recommendation>, String> {
    let text = extract_json_object(raw).ok_or("reply contains no JSON object")?;
    let mut value: Value = serde_json::from_str(text).map_err(|e| format!("reply is not valid JSON: {}", e))?;

    let entries = match value.get_mut("recommendations").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        _ => return Err("reply has no `recommendations` array".to_string()),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Recommendation>(entry) {
            Ok(rec) => Some(rec),
            Err(e) => {
                debug!("Dropping malformed recommendation: {}", e);
                None
            }
        })
        .collect())
}

/// Resolve a recommendation to an issue index inside `batch`.
fn match_issue(rec: &Recommendation, batch: &[usize], issues: &[Issue]) -> Option<usize> {
    if let Some(id) = rec.id {
        if batch.contains(&id) && rec.agrees_with(&issues[id]) {
            return Some(id);
        }
    }

    let key = rec.key()?;
    batch
        .iter()
        .copied()
        .find(|&idx| !issues[idx].is_enriched() && issues[idx].key() == key)
}

/// Apply one batch's recommendations. Returns how many issues were enriched.
fn apply_batch(issues: &mut [Issue], batch: &[usize], recs: &[Recommendation]) -> usize {
    let mut enriched = 0;
    for rec in recs {
        let Some(text) = rec.text.as_deref() else {
            continue;
        };
        match match_issue(rec, batch, issues) {
            Some(idx) => {
                if issues[idx].apply_enrichment(text, rec.code_suggestion.as_deref()) {
                    enriched += 1;
                }
            }
            None => debug!(
                "Unmatched recommendation (id={:?}, rule={:?}, path={:?})",
                rec.id, rec.rule, rec.path
            ),
        }
    }
    enriched
}

/// Run the enrichment pass over `report` in place.
pub async fn enrich(
    invoker: &SpecialistInvoker,
    report: &mut AggregateReport,
    config: &EnrichmentConfig,
    context: Arc<RepositoryContext>,
    timeout: Duration,
    max_concurrency: usize,
) -> EnrichmentStats {
    let selected = config.filter.select(&report.issues);
    let mut stats = EnrichmentStats {
        selected: selected.len(),
        ..Default::default()
    };
    if selected.is_empty() {
        debug!("No issues selected for enrichment");
        return stats;
    }

    let batches: Vec<Vec<usize>> = selected
        .chunks(config.batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect();
    stats.batches = batches.len();
    info!(
        "Requesting recommendations for {} issues in {} batches",
        stats.selected, stats.batches
    );

    let spec = &config.recommender;
    let requests: Vec<(Vec<usize>, String)> = batches
        .into_iter()
        .map(|batch| {
            let task = batch_payload(&report.issues, &batch);
            (batch, task)
        })
        .collect();

    let replies: Vec<(Vec<usize>, Result<String, FailureInfo>)> = stream::iter(requests)
        .map(|(batch, task)| {
            let invoker = invoker.clone();
            let context = Arc::clone(&context);
            async move {
                let reply = invoker.call_raw(spec, &task, context, timeout).await;
                (batch, reply)
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    let mut last_failure: Option<FailureInfo> = None;
    for (batch, reply) in replies {
        let parsed = reply.and_then(|raw| {
            parse_recommendations(&raw).map_err(|e| FailureInfo::new(FailureKind::InvalidOutput, e))
        });
        match parsed {
            Ok(recs) => stats.enriched += apply_batch(&mut report.issues, &batch, &recs),
            Err(failure) => {
                warn!(
                    "Recommendation batch of {} issues failed ({}): {}",
                    batch.len(),
                    failure.kind,
                    failure.message
                );
                stats.failed_batches += 1;
                last_failure = Some(failure);
            }
        }
    }

    let mut summary = Summary::new();
    summary.insert("selected".to_string(), json!(stats.selected));
    summary.insert("batches".to_string(), json!(stats.batches));
    summary.insert("failed_batches".to_string(), json!(stats.failed_batches));
    summary.insert("enriched".to_string(), json!(stats.enriched));
    let failure = last_failure.map(|f| FailureInfo {
        message: format!(
            "{} of {} batches failed; last: {}",
            stats.failed_batches, stats.batches, f.message
        ),
        ..f
    });
    report.by_agent.insert(
        spec.name.clone(),
        Value::Object(summary_entry(&summary, failure.as_ref())),
    );

    report.recount_recommendations();
    info!(
        "Enrichment finished: {} issues enriched, {} failed batches",
        stats.enriched, stats.failed_batches
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::backend::testing::{context, spec, ScriptedBackend};
    use crate::agent::RetryPolicy;
    use crate::error::BackendError;
    use crate::models::{EnrichmentFilter, Severity};
    use serde_json::Map;

    fn invoker(backend: Arc<ScriptedBackend>) -> SpecialistInvoker {
        SpecialistInvoker::new(
            backend,
            RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
        )
    }

    fn report(n: u32) -> AggregateReport {
        let issues = (1..=n)
            .map(|i| {
                Issue::new(format!("rule{}", i), format!("f{}.py", i), Severity::Error, "m")
                    .at_lines(i * 10, None)
            })
            .collect();
        AggregateReport::new(Map::new(), issues)
    }

    fn config(batch_size: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            recommender: spec("recommendations"),
            filter: EnrichmentFilter::default(),
            batch_size,
        }
    }

    /// Answers every issue in the request, in reverse order.
    fn reversed_reply(request: &crate::agent::SpecialistRequest) -> Result<String, BackendError> {
        let start = request.task.find('{').unwrap_or(0);
        let payload: Value = serde_json::from_str(&request.task[start..]).unwrap();
        let mut recs: Vec<Value> = payload["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|issue| {
                json!({
                    "id": issue["id"],
                    "rule": issue["rule"],
                    "path": issue["path"],
                    "line_start": issue["line_start"],
                    "text": format!("fix {}", issue["rule"].as_str().unwrap()),
                    "code_suggestion": format!("// {}", issue["path"].as_str().unwrap()),
                })
            })
            .collect();
        recs.reverse();
        Ok(json!({ "recommendations": recs }).to_string())
    }

    #[tokio::test]
    async fn test_reversed_reply_keeps_identity() {
        let backend = Arc::new(ScriptedBackend::new().respond_with("recommendations", reversed_reply));
        let mut report = report(5);
        let original = report.clone();

        let stats = enrich(&invoker(backend.clone()), &mut report, &config(2), context(), Duration::from_secs(5), 2).await;

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.enriched, 5);
        assert_eq!(report.recommendations, 5);
        for (after, before) in report.issues.iter().zip(&original.issues) {
            assert_eq!(after.key(), before.key());
            assert_eq!(after.recommendation.as_deref(), Some(format!("fix {}", before.rule).as_str()));
            assert_eq!(after.code_suggestion.as_deref(), Some(format!("// {}", before.path).as_str()));
        }
        assert_eq!(report.by_agent["recommendations"]["enriched"], 5);
        assert!(report.by_agent["recommendations"].get("error").is_none());
    }

    #[tokio::test]
    async fn test_match_by_key_without_id() {
        let reply = json!({"recommendations": [
            {"rule": "rule2", "path": "f2.py", "line_start": 20, "text": "second"},
            {"rule": "rule1", "path": "f1.py", "line_start": 10, "text": "first"},
            {"rule": "rule9", "path": "f9.py", "line_start": 90, "text": "nobody"}
        ]});
        let backend = Arc::new(ScriptedBackend::new().reply("recommendations", reply.to_string()));
        let mut report = report(2);

        let stats = enrich(&invoker(backend), &mut report, &config(10), context(), Duration::from_secs(5), 1).await;
        assert_eq!(stats.enriched, 2);
        assert_eq!(report.issues[0].recommendation.as_deref(), Some("first"));
        assert_eq!(report.issues[1].recommendation.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_not_trusted() {
        // id 0 claims rule2's identity; it must not land on issue 0.
        let reply = json!({"recommendations": [
            {"id": 0, "rule": "rule2", "path": "f2.py", "line_start": 20, "text": "for rule2"}
        ]});
        let backend = Arc::new(ScriptedBackend::new().reply("recommendations", reply.to_string()));
        let mut report = report(2);

        enrich(&invoker(backend), &mut report, &config(10), context(), Duration::from_secs(5), 1).await;
        assert!(report.issues[0].recommendation.is_none());
        assert_eq!(report.issues[1].recommendation.as_deref(), Some("for rule2"));
    }

    #[tokio::test]
    async fn test_failed_batch_is_contained() {
        let backend = Arc::new(ScriptedBackend::new().replies(
            "recommendations",
            vec![
                Err(BackendError::Tool {
                    tool: "read_code_snippet".into(),
                    message: "boom".into(),
                }),
                Ok(json!({"recommendations": [{"id": 2, "text": "ok"}, {"id": 3, "text": "ok"}]}).to_string()),
            ],
        ));
        let mut report = report(4);

        // One batch at a time so the scripted replies line up with batches.
        let stats = enrich(&invoker(backend), &mut report, &config(2), context(), Duration::from_secs(5), 1).await;

        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.enriched, 2);
        assert!(report.issues[0].recommendation.is_none());
        assert!(report.issues[1].recommendation.is_none());
        assert_eq!(report.recommendations, 2);
        assert_eq!(report.total_issues, 4);
        assert_eq!(report.by_agent["recommendations"]["error"]["kind"], "tool_error");
    }

    #[tokio::test]
    async fn test_filter_bounds_selection() {
        let backend = Arc::new(ScriptedBackend::new().respond_with("recommendations", reversed_reply));
        let mut report = report(3);
        report.issues[1].severity = Severity::Info;
        let mut config = config(10);
        config.filter.max_issues = 1;

        let stats = enrich(&invoker(backend.clone()), &mut report, &config, context(), Duration::from_secs(5), 1).await;
        assert_eq!(stats.selected, 1);
        assert_eq!(backend.calls().len(), 1);
        assert!(report.issues[1].recommendation.is_none());
    }

    #[tokio::test]
    async fn test_nothing_selected_makes_no_call() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut report = report(2);
        for issue in &mut report.issues {
            issue.severity = Severity::Info;
        }

        let stats = enrich(&invoker(backend.clone()), &mut report, &config(5), context(), Duration::from_secs(5), 1).await;
        assert_eq!(stats, EnrichmentStats::default());
        assert!(backend.calls().is_empty());
        assert!(report.by_agent.is_empty());
    }

    #[test]
    fn test_parse_recommendations_rejects_non_json() {
        assert!(parse_recommendations("sorry").is_err());
        assert!(parse_recommendations("{\"other\": []}").is_err());
        assert_eq!(parse_recommendations("{\"recommendations\": [1, {\"id\": 0}]}").unwrap().len(), 1);
    }
}
