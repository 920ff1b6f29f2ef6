//! Report rendering.
//!
//! Renders an [`AggregateReport`] as structured JSON or as human-readable
//! text, and writes it to stdout or a file.

use crate::analysis::count_by_severity;
use crate::models::{AggregateReport, Issue};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON document (default)
    #[default]
    Json,
    /// Plain text for terminals
    Human,
}

/// The JSON document shape: `{"summary": {...}, "issues": [...]}`.
fn report_value(report: &AggregateReport) -> Value {
    json!({
        "summary": {
            "by_agent": report.by_agent,
            "total_issues": report.total_issues,
            "recommendations": report.recommendations,
        },
        "issues": report.issues,
    })
}

/// Generate a JSON report. `indent == 0` yields a single line.
pub fn generate_json_report(report: &AggregateReport, indent: usize) -> Result<String> {
    let value = report_value(report);
    if indent == 0 {
        return serde_json::to_string(&value).map_err(Into::into);
    }

    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .context("Failed to serialize report")?;
    String::from_utf8(buf).context("Report is not valid UTF-8")
}

/// Generate the human-readable report.
pub fn generate_human_report(report: &AggregateReport) -> String {
    let mut output = String::new();

    output.push_str(&generate_summary_section(report));
    output.push('\n');
    output.push_str(&generate_issues_section(&report.issues));

    output
}

fn generate_summary_section(report: &AggregateReport) -> String {
    let mut section = String::new();

    section.push_str("=== Lint Summary ===\n");
    section.push_str(&format!(
        "Generated: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- total_issues: {}\n", report.total_issues));
    section.push_str(&format!("- recommendations: {}\n", report.recommendations));

    let severities = count_by_severity(&report.issues);
    if !severities.is_empty() {
        let parts: Vec<String> = severities
            .iter()
            .map(|(severity, count)| format!("{}={}", severity, count))
            .collect();
        section.push_str(&format!("- by_severity: {}\n", parts.join(", ")));
    }

    section.push_str("- by_agent:\n");
    for (agent, summary) in &report.by_agent {
        section.push_str(&format!("    {}: {}\n", agent, agent_line(summary)));
    }

    section
}

fn agent_line(summary: &Value) -> String {
    if let Some(error) = summary.get("error") {
        let kind = error.get("kind").and_then(Value::as_str).unwrap_or("unknown");
        let message = error.get("message").and_then(Value::as_str).unwrap_or("");
        return format!("FAILED ({}): {}", kind, message);
    }
    if summary.get("skipped") == Some(&Value::Bool(true)) {
        let reason = summary.get("reason").and_then(Value::as_str).unwrap_or("");
        return format!("skipped ({})", reason);
    }
    summary.to_string()
}

fn generate_issues_section(issues: &[Issue]) -> String {
    let mut section = String::new();

    section.push_str("=== Issues ===\n");
    if issues.is_empty() {
        section.push_str("No issues found.\n");
        return section;
    }

    for (i, issue) in issues.iter().enumerate() {
        section.push_str(&generate_issue_block(i + 1, issue));
    }

    section
}

fn generate_issue_block(number: usize, issue: &Issue) -> String {
    let mut block = String::new();

    let location = match issue.line_start {
        Some(_) => format!(" ({})", issue.line_range()),
        None => String::new(),
    };
    block.push_str(&format!(
        "{}. [{}] {} - {}{}\n   {}\n",
        number, issue.severity, issue.rule, issue.path, location, issue.message
    ));

    if let Some(ref recommendation) = issue.recommendation {
        block.push_str(&format!("   Recommendation: {}\n", recommendation));
    }
    if let Some(ref code) = issue.code_suggestion {
        block.push_str("   Code Suggestion:\n");
        for line in code.lines() {
            block.push_str(&format!("     {}\n", line));
        }
    }

    block
}

/// Write rendered output to `out`, or stdout when absent.
pub fn write_output(content: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .context("Failed to write report to stdout")?;
            if !content.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
            Ok(())
        }
    }
}
