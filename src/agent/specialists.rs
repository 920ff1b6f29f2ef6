//! Built-in specialist catalog.
//!
//! Every specialist is the same shape: a name, a header describing its lint
//! dimension, the shared JSON output contract, and the repository tools it
//! may call. The analysis content lives entirely in the prompt.

use crate::error::OrchestratorError;
use crate::models::{SpecialistSpec, ToolKind};

/// Models assigned to the three specialist roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub specialist: String,
    pub triage: String,
    pub recommendations: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            specialist: "gpt-5-mini-2025-08-07".to_string(),
            triage: "gpt-5-2025-08-07".to_string(),
            recommendations: "gpt-5-mini-2025-08-07".to_string(),
        }
    }
}

pub const RECOMMENDATIONS: &str = "recommendations";
pub const TRIAGE: &str = "triage";

const OUTPUT_CONTRACT: &str = r#"Return ONLY a compact JSON object of the form:
{"summary": {<counts and short notes>}, "issues": [{"rule": "snake_case_id", "path": "relative/path", "line_start": 1, "line_end": 1, "severity": "info|warning|error", "message": "one sentence"}]}
Use paths relative to the repository root. Omit line_start/line_end when a finding has no location. Do not wrap the JSON in prose."#;

const ANALYSIS_TOOLS: [ToolKind; 6] = ToolKind::ALL;

// name, description, header
const CATALOG: [(&str, &str, &str); 8] = [
    (
        "duplication",
        "Detects duplicated code blocks across the repository.",
        "Use your tools to analyze duplication and return compact JSON.",
    ),
    (
        "design",
        "Evaluates class cohesion and placement of methods.",
        "Use your tools to check class cohesion and return compact JSON.",
    ),
    (
        "structure",
        "Assesses file and directory structure.",
        "Use your tools to assess structure and return compact JSON.",
    ),
    (
        "complexity",
        "Flags long files, classes, and functions.",
        "Use your tools to flag long code and return compact JSON.",
    ),
    (
        "typing_docs",
        "Checks type hints, docstrings, and comment density.",
        "Use your tools to check typing/docs and return compact JSON.",
    ),
    (
        "error_handling",
        "Checks for proper error handling patterns.",
        "Use your tools to check error handling and return compact JSON.",
    ),
    (
        "testing",
        "Estimates test coverage and testing hygiene.",
        "Use your tools to check tests and return compact JSON.",
    ),
    (
        "security",
        "Flags common security smell patterns.",
        "Use your tools to check security smells and return compact JSON.",
    ),
];

/// Names of the analysis specialists in declared order.
pub fn catalog_names() -> Vec<&'static str> {
    CATALOG.iter().map(|(name, _, _)| *name).collect()
}

fn instructions(header: &str, rules_text: Option<&str>) -> String {
    let mut text = format!("{}\n\n{}", header, OUTPUT_CONTRACT);
    if let Some(rules) = rules_text.map(str::trim).filter(|r| !r.is_empty()) {
        text.push_str("\n\nBest-practice guidelines to adhere to:\n");
        text.push_str(rules);
    }
    text
}

/// All analysis specialists, in declared order.
pub fn catalog(models: &ModelSelection, rules_text: Option<&str>) -> Vec<SpecialistSpec> {
    CATALOG
        .iter()
        .map(|(name, description, header)| SpecialistSpec {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions(header, rules_text),
            tools: ANALYSIS_TOOLS.to_vec(),
            model: models.specialist.clone(),
        })
        .collect()
}

/// Pick `names` out of `catalog`, in the order given.
pub fn select(
    catalog: Vec<SpecialistSpec>,
    names: &[String],
) -> Result<Vec<SpecialistSpec>, OrchestratorError> {
    if names.is_empty() {
        return Ok(catalog);
    }

    names
        .iter()
        .map(|name| {
            catalog
                .iter()
                .find(|spec| spec.name == name.trim())
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::Configuration(format!(
                        "unknown specialist '{}' (available: {})",
                        name,
                        catalog_names().join(", ")
                    ))
                })
        })
        .collect()
}

/// The enrichment recommender.
pub fn recommendations_spec(models: &ModelSelection) -> SpecialistSpec {
    SpecialistSpec {
        name: RECOMMENDATIONS.to_string(),
        description: "Generates actionable code recommendations for selected issues.".to_string(),
        instructions: concat!(
            "You generate concise, actionable recommendations for the provided lint issues.\n",
            "Each issue carries an integer id. Read the code around it with read_code_snippet when needed.\n",
            "Return ONLY JSON with 'recommendations': [{id, path, line_start, rule, text, code_suggestion?}].\n",
            "Keep each text concise; include code_suggestion only if short and necessary."
        )
        .to_string(),
        tools: vec![ToolKind::ReadCodeSnippet],
        model: models.recommendations.clone(),
    }
}

/// The coordinator used for the optional final review in triage mode.
pub fn triage_spec(models: &ModelSelection) -> SpecialistSpec {
    SpecialistSpec {
        name: TRIAGE.to_string(),
        description: "Reviews specialist summaries and returns a consolidated report.".to_string(),
        instructions: format!(
            "You are the linter triage agent. You receive the summaries of the specialist lint agents \
             that already ran. Cross-check them against the repository and report only findings \
             the specialists missed.\n\n{}",
            OUTPUT_CONTRACT
        ),
        tools: vec![ToolKind::ScanRepoIndex, ToolKind::LoadRulesText, ToolKind::ReadCodeSnippet],
        model: models.triage.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_and_models() {
        let models = ModelSelection::default();
        let specs = catalog(&models, None);
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, catalog_names());
        assert_eq!(names.first(), Some(&"duplication"));
        assert_eq!(names.last(), Some(&"security"));
        assert!(specs.iter().all(|s| s.model == "gpt-5-mini-2025-08-07"));
        assert!(specs.iter().all(|s| s.instructions.contains("\"issues\"")));
    }

    #[test]
    fn test_rules_text_appended() {
        let specs = catalog(&ModelSelection::default(), Some("No bare except."));
        assert!(specs[0].instructions.ends_with("No bare except."));

        let specs = catalog(&ModelSelection::default(), Some("   "));
        assert!(!specs[0].instructions.contains("guidelines"));
    }

    #[test]
    fn test_select_preserves_given_order() {
        let specs = catalog(&ModelSelection::default(), None);
        let picked = select(specs, &["security".to_string(), "design".to_string()]).unwrap();
        let names: Vec<_> = picked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["security", "design"]);
    }

    #[test]
    fn test_select_unknown_name_is_configuration_error() {
        let specs = catalog(&ModelSelection::default(), None);
        let err = select(specs, &["style".to_string()]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
        assert!(err.to_string().contains("style"));
    }

    #[test]
    fn test_role_specs_use_their_models() {
        let models = ModelSelection {
            specialist: "s".into(),
            triage: "t".into(),
            recommendations: "r".into(),
        };
        assert_eq!(recommendations_spec(&models).model, "r");
        assert_eq!(recommendations_spec(&models).tools, vec![ToolKind::ReadCodeSnippet]);
        assert_eq!(triage_spec(&models).model, "t");
        assert_eq!(triage_spec(&models).name, TRIAGE);
    }
}
