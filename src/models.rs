//! Data models for the lint orchestrator.
//!
//! This module contains the core data structures shared by the runners,
//! the aggregation pipeline, and the renderers: issues, specialist results,
//! failure records, the aggregate report, and the immutable run config.

use crate::error::{BackendError, OrchestratorError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Free-form per-agent summary. The engine copies it verbatim.
pub type Summary = Map<String, Value>;

/// Severity level of an issue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational note.
    Info,
    /// Something that should be fixed.
    #[default]
    Warning,
    /// Something that must be fixed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl Severity {
    /// Parse a severity as emitted by a remote model.
    ///
    /// Case-insensitive; accepts the short aliases models tend to produce.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" | "information" | "note" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "error" | "err" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// A single lint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Rule identifier (e.g. `bare_except`).
    pub rule: String,
    /// Path relative to the repository root.
    pub path: String,
    /// First line of the finding (1-indexed).
    pub line_start: Option<u32>,
    /// Last line of the finding (1-indexed, inclusive).
    pub line_end: Option<u32>,
    pub severity: Severity,
    pub message: String,
    /// Fix recommendation, attached at most once by enrichment.
    pub recommendation: Option<String>,
    /// Suggested replacement code, attached at most once by enrichment.
    pub code_suggestion: Option<String>,
}

impl Issue {
    pub fn new(
        rule: impl Into<String>,
        path: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule: rule.into(),
            path: path.into(),
            line_start: None,
            line_end: None,
            severity,
            message: message.into(),
            recommendation: None,
            code_suggestion: None,
        }
    }

    pub fn at_lines(mut self, start: u32, end: Option<u32>) -> Self {
        self.line_start = Some(start);
        self.line_end = end;
        self
    }

    /// Returns the line range as a formatted string, empty when unknown.
    pub fn line_range(&self) -> String {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) if end != start => format!("{}-{}", start, end),
            (Some(start), _) => start.to_string(),
            (None, _) => String::new(),
        }
    }

    /// Inclusive line span, if the issue carries line info.
    pub fn span(&self) -> Option<(u32, u32)> {
        self.line_start
            .map(|start| (start, self.line_end.unwrap_or(start).max(start)))
    }

    /// Key used to match enrichment output back to issues.
    pub fn key(&self) -> IssueKey {
        IssueKey {
            rule: self.rule.clone(),
            path: self.path.clone(),
            line_start: self.line_start,
        }
    }

    /// True if either enrichment field is present and non-empty.
    pub fn is_enriched(&self) -> bool {
        has_text(&self.recommendation) || has_text(&self.code_suggestion)
    }

    /// Attach enrichment. Returns `false` (leaving the issue untouched) if
    /// the issue was already enriched or the recommendation is empty.
    pub fn apply_enrichment(&mut self, recommendation: &str, code_suggestion: Option<&str>) -> bool {
        if self.is_enriched() || recommendation.trim().is_empty() {
            return false;
        }
        self.recommendation = Some(recommendation.to_string());
        self.code_suggestion = code_suggestion
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);
        true
    }
}

fn has_text(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// `(rule, path, line_start)` identity used by the enrichment pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub rule: String,
    pub path: String,
    pub line_start: Option<u32>,
}

/// Classification of a specialist failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ToolError,
    InvalidOutput,
    Unknown,
}

impl FailureKind {
    /// Only transient conditions are worth a second attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ToolError => "tool_error",
            FailureKind::InvalidOutput => "invalid_output",
            FailureKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Why a specialist produced no (or partial) output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }
}

impl From<&BackendError> for FailureInfo {
    fn from(err: &BackendError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Output of one specialist invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub agent_name: String,
    pub summary: Summary,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
    /// Entries from the raw output that failed schema validation.
    #[serde(default)]
    pub dropped_issues: usize,
}

impl SpecialistResult {
    pub fn success(agent_name: impl Into<String>, summary: Summary, issues: Vec<Issue>) -> Self {
        Self {
            agent_name: agent_name.into(),
            summary,
            issues,
            error: None,
            dropped_issues: 0,
        }
    }

    pub fn failed(agent_name: impl Into<String>, error: FailureInfo) -> Self {
        Self {
            agent_name: agent_name.into(),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Placeholder for a specialist the triage policy chose not to run.
    pub fn skipped(agent_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut summary = Summary::new();
        summary.insert("skipped".to_string(), Value::Bool(true));
        summary.insert("reason".to_string(), Value::String(reason.into()));
        Self::success(agent_name, summary, Vec::new())
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Recorded without being executed.
    pub fn is_skipped(&self) -> bool {
        self.error.is_none() && self.summary.get("skipped") == Some(&Value::Bool(true))
    }
}

/// Final merged output of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Per-agent summaries in execution order, with `error` injected on failure.
    pub by_agent: Map<String, Value>,
    pub total_issues: usize,
    pub recommendations: usize,
    pub issues: Vec<Issue>,
}

impl AggregateReport {
    pub fn new(by_agent: Map<String, Value>, issues: Vec<Issue>) -> Self {
        Self {
            by_agent,
            total_issues: issues.len(),
            recommendations: 0,
            issues,
        }
    }

    /// Recompute the enrichment count after the enrichment pass.
    pub fn recount_recommendations(&mut self) {
        self.recommendations = self.issues.iter().filter(|i| i.is_enriched()).count();
    }

    /// Names of agents whose summary carries an `error` entry.
    pub fn failed_agents(&self) -> Vec<&str> {
        self.by_agent
            .iter()
            .filter(|(_, summary)| summary.get("error").is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Remote tools a specialist may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ScanRepoIndex,
    ListFiles,
    ReadCodeSnippet,
    SearchCode,
    GetFileInfo,
    LoadRulesText,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::ScanRepoIndex,
        ToolKind::ListFiles,
        ToolKind::ReadCodeSnippet,
        ToolKind::SearchCode,
        ToolKind::GetFileInfo,
        ToolKind::LoadRulesText,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ScanRepoIndex => "scan_repo_index",
            ToolKind::ListFiles => "list_files",
            ToolKind::ReadCodeSnippet => "read_code_snippet",
            ToolKind::SearchCode => "search_code",
            ToolKind::GetFileInfo => "get_file_info",
            ToolKind::LoadRulesText => "load_rules_text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// One specialist: identically shaped, differently prompted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistSpec {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<ToolKind>,
    pub model: String,
}

/// Execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Concurrent fan-out/fan-in
    #[default]
    Parallel,
    /// Sequential coordinator
    Triage,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Triage => write!(f, "triage"),
        }
    }
}

pub type IssuePredicate = Arc<dyn Fn(&Issue) -> bool + Send + Sync>;

/// Chooses which aggregated issues are worth paying for a recommendation.
#[derive(Clone)]
pub struct EnrichmentFilter {
    pub min_severity: Severity,
    pub max_issues: usize,
    pub predicate: Option<IssuePredicate>,
}

impl fmt::Debug for EnrichmentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentFilter")
            .field("min_severity", &self.min_severity)
            .field("max_issues", &self.max_issues)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for EnrichmentFilter {
    fn default() -> Self {
        Self {
            min_severity: Severity::Warning,
            max_issues: 100,
            predicate: None,
        }
    }
}

impl EnrichmentFilter {
    /// Indices of the selected issues, most severe first (ties by path, then
    /// by position), capped at `max_issues`.
    pub fn select(&self, issues: &[Issue]) -> Vec<usize> {
        let mut selected: Vec<usize> = issues
            .iter()
            .enumerate()
            .filter(|(_, issue)| issue.severity >= self.min_severity)
            .filter(|(_, issue)| self.predicate.as_ref().map_or(true, |p| p(issue)))
            .map(|(idx, _)| idx)
            .collect();

        selected.sort_by(|&a, &b| {
            issues[b]
                .severity
                .cmp(&issues[a].severity)
                .then_with(|| issues[a].path.cmp(&issues[b].path))
                .then_with(|| a.cmp(&b))
        });
        selected.truncate(self.max_issues);
        selected
    }
}

/// Settings for the optional recommendation pass.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub recommender: SpecialistSpec,
    pub filter: EnrichmentFilter,
    pub batch_size: usize,
}

/// Skip `specialist` when the summary of `when` has `key == equals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRule {
    pub specialist: String,
    pub when: String,
    pub key: String,
    pub equals: Value,
}

/// Triage-mode extras.
#[derive(Debug, Clone, Default)]
pub struct TriageConfig {
    pub skip_rules: Vec<SkipRule>,
    /// Optional final state: a coordinator pass over all prior summaries.
    pub final_review: Option<SpecialistSpec>,
}

/// Immutable description of one run. Built once, shared read-only.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: ExecutionMode,
    pub specialists: Vec<SpecialistSpec>,
    pub per_agent_timeout: Duration,
    pub max_concurrency: usize,
    /// Optional global deadline across all specialist tasks.
    pub run_timeout: Option<Duration>,
    /// Base delay before the single retry of a retryable failure.
    pub retry_backoff: Duration,
    pub enrichment: Option<EnrichmentConfig>,
    pub triage: TriageConfig,
}

impl RunConfig {
    pub fn new(mode: ExecutionMode, specialists: Vec<SpecialistSpec>) -> Self {
        Self {
            mode,
            specialists,
            per_agent_timeout: Duration::from_secs(300),
            max_concurrency: 4,
            run_timeout: None,
            retry_backoff: Duration::from_secs(1),
            enrichment: None,
            triage: TriageConfig::default(),
        }
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.specialists.is_empty() {
            return Err(OrchestratorError::Configuration(
                "no specialists configured".to_string(),
            ));
        }
        if self.per_agent_timeout.is_zero() {
            return Err(OrchestratorError::Configuration(
                "per-agent timeout must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.specialists {
            if spec.name.trim().is_empty() {
                return Err(OrchestratorError::Configuration(
                    "specialist name must not be empty".to_string(),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "duplicate specialist name: {}",
                    spec.name
                )));
            }
        }

        if let Some(ref enrichment) = self.enrichment {
            if enrichment.batch_size == 0 {
                return Err(OrchestratorError::Configuration(
                    "enrichment batch_size must be at least 1".to_string(),
                ));
            }
            if seen.contains(enrichment.recommender.name.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "recommender name '{}' collides with a specialist",
                    enrichment.recommender.name
                )));
            }
        }

        if let Some(ref review) = self.triage.final_review {
            if seen.contains(review.name.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "final review name '{}' collides with a specialist",
                    review.name
                )));
            }
        }

        Ok(())
    }
}
