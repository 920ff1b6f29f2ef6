//! Configuration file handling.
//!
//! This module handles loading `.swarmlint.toml`, merging it with CLI
//! arguments (which already carry their environment fallbacks), and building
//! the immutable [`RunConfig`] the orchestrator runs with.

use crate::agent::specialists::{self, ModelSelection};
use crate::agent::BackendConfig;
use crate::error::OrchestratorError;
use crate::models::{
    EnrichmentConfig, EnrichmentFilter, ExecutionMode, RunConfig, Severity, SkipRule,
    TriageConfig,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = ".swarmlint.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model and API settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Orchestration settings.
    #[serde(default)]
    pub run: RunSettings,

    /// Recommendation pass settings.
    #[serde(default)]
    pub enrichment: EnrichmentSettings,

    /// Triage mode settings.
    #[serde(default)]
    pub triage: TriageSettings,

    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_specialist_model")]
    pub specialist_model: String,

    #[serde(default = "default_triage_model")]
    pub triage_model: String,

    #[serde(default = "default_specialist_model")]
    pub recommendations_model: String,

    /// Sampling temperature; omitted from requests when unset.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tool-calling rounds per specialist.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            specialist_model: default_specialist_model(),
            triage_model: default_triage_model(),
            recommendations_model: default_specialist_model(),
            temperature: None,
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_specialist_model() -> String {
    ModelSelection::default().specialist
}

fn default_triage_model() -> String {
    ModelSelection::default().triage
}

fn default_max_tool_rounds() -> usize {
    12
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-specialist timeout.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Global deadline across all specialists.
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,

    /// Base delay before retrying a timeout or rate limit.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Subset of specialists to run, in order. Empty means all.
    #[serde(default)]
    pub specialists: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            max_concurrency: default_max_concurrency(),
            timeout_seconds: default_timeout(),
            run_timeout_seconds: None,
            retry_backoff_ms: default_retry_backoff_ms(),
            specialists: Vec::new(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout() -> u64 {
    300
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Recommendation pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Issues below this severity get no recommendation.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,

    /// Upper bound on issues sent to the recommender.
    #[serde(default = "default_max_issues")]
    pub max_issues: usize,

    /// Issues per recommender call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: default_min_severity(),
            max_issues: default_max_issues(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_severity() -> Severity {
    Severity::Warning
}

fn default_max_issues() -> usize {
    100
}

fn default_batch_size() -> usize {
    20
}

/// Triage mode settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageSettings {
    /// Run the triage agent over all summaries at the end.
    #[serde(default)]
    pub final_review: bool,

    /// `[[triage.skip]]` rules.
    #[serde(default)]
    pub skip: Vec<SkipRule>,
}

/// File scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to exclude.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum files to index.
    #[serde(default)]
    pub max_files: Option<usize>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
            max_files: None,
        }
    }
}

fn default_extensions() -> Vec<String> {
    crate::scanner::ScanConfig::default().extensions
}

fn default_excludes() -> Vec<String> {
    crate::scanner::ScanConfig::default().excludes
}

fn default_max_file_size() -> u64 {
    1024 * 1024 // 1MB
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Try to load configuration from a repo directory.
    pub fn load_from_repo(repo_path: &Path) -> Result<Option<Self>> {
        let config_path = repo_path.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user gave (on the command line or through the
    /// matching environment variable) override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.specialist_model {
            self.model.specialist_model = model.clone();
        }
        if let Some(ref model) = args.triage_model {
            self.model.triage_model = model.clone();
        }
        if let Some(ref model) = args.recommendations_model {
            self.model.recommendations_model = model.clone();
        }
        if let Some(ref url) = args.api_url {
            self.model.api_url = url.clone();
        }

        if let Some(mode) = args.mode {
            self.run.mode = mode;
        }
        if let Some(max) = args.max_concurrency {
            self.run.max_concurrency = max;
        }
        if let Some(timeout) = args.timeout {
            self.run.timeout_seconds = timeout;
        }
        if let Some(run_timeout) = args.run_timeout {
            self.run.run_timeout_seconds = Some(run_timeout);
        }
        if let Some(ref names) = args.specialists {
            self.run.specialists = names
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
        }

        // Flags always override
        if args.no_recommendations {
            self.enrichment.enabled = false;
        }
    }

    pub fn models(&self) -> ModelSelection {
        ModelSelection {
            specialist: self.model.specialist_model.clone(),
            triage: self.model.triage_model.clone(),
            recommendations: self.model.recommendations_model.clone(),
        }
    }

    /// HTTP backend settings. The API key is read from `api_key_env`.
    pub fn backend_config(&self) -> BackendConfig {
        let api_key = std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set; specialist calls will fail",
                self.model.api_key_env
            );
        }

        BackendConfig {
            api_url: self.model.api_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: self.model.temperature,
            max_tool_rounds: self.model.max_tool_rounds,
        }
    }

    /// Build the immutable run description.
    pub fn to_run_config(&self, rules_text: Option<&str>) -> Result<RunConfig, OrchestratorError> {
        let models = self.models();
        let catalog = specialists::catalog(&models, rules_text);
        let selected = specialists::select(catalog, &self.run.specialists)?;

        for rule in &self.triage.skip {
            if !selected.iter().any(|s| s.name == rule.specialist) {
                warn!(
                    "Skip rule targets '{}', which is not in this run",
                    rule.specialist
                );
            }
        }

        let mut config = RunConfig::new(self.run.mode, selected);
        config.per_agent_timeout = Duration::from_secs(self.run.timeout_seconds);
        config.max_concurrency = self.run.max_concurrency;
        config.run_timeout = self.run.run_timeout_seconds.map(Duration::from_secs);
        config.retry_backoff = Duration::from_millis(self.run.retry_backoff_ms);

        if self.enrichment.enabled {
            config.enrichment = Some(EnrichmentConfig {
                recommender: specialists::recommendations_spec(&models),
                filter: EnrichmentFilter {
                    min_severity: self.enrichment.min_severity,
                    max_issues: self.enrichment.max_issues,
                    predicate: None,
                },
                batch_size: self.enrichment.batch_size,
            });
        }

        config.triage = TriageConfig {
            skip_rules: self.triage.skip.clone(),
            final_review: self
                .triage
                .final_review
                .then(|| specialists::triage_spec(&models)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, LogLevel};
    use crate::report::OutputFormat;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn make_args() -> Args {
        Args {
            repo_path: Some(PathBuf::from(".")),
            rules_path: None,
            prompt_overrides: None,
            format: OutputFormat::Json,
            mode: None,
            indent: 2,
            out: None,
            log_level: LogLevel::Info,
            verbose: false,
            quiet: false,
            specialist_model: None,
            triage_model: None,
            recommendations_model: None,
            max_concurrency: None,
            timeout: None,
            run_timeout: None,
            specialists: None,
            no_recommendations: false,
            config: None,
            api_url: None,
            init_config: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.specialist_model, "gpt-5-mini-2025-08-07");
        assert_eq!(config.model.triage_model, "gpt-5-2025-08-07");
        assert_eq!(config.model.recommendations_model, "gpt-5-mini-2025-08-07");
        assert_eq!(config.run.max_concurrency, 4);
        assert_eq!(config.run.timeout_seconds, 300);
        assert!(config.enrichment.enabled);
        assert_eq!(config.enrichment.min_severity, Severity::Warning);
        assert!(config.scanner.extensions.contains(&"py".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[model]
specialist_model = "small"
temperature = 0.2

[run]
mode = "triage"
max_concurrency = 2
specialists = ["security", "testing"]

[enrichment]
min_severity = "error"
batch_size = 5

[triage]
final_review = true

[[triage.skip]]
specialist = "testing"
when = "structure"
key = "has_tests"
equals = false

[scanner]
extensions = ["py"]
max_files = 50
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.model.specialist_model, "small");
        assert_eq!(config.model.triage_model, "gpt-5-2025-08-07");
        assert_eq!(config.model.temperature, Some(0.2));
        assert_eq!(config.run.mode, ExecutionMode::Triage);
        assert_eq!(config.run.specialists, vec!["security", "testing"]);
        assert_eq!(config.enrichment.min_severity, Severity::Error);
        assert_eq!(config.enrichment.max_issues, 100);
        assert!(config.triage.final_review);
        assert_eq!(config.triage.skip[0].equals, serde_json::json!(false));
        assert_eq!(config.scanner.max_files, Some(50));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config: Config = toml::from_str("[run]\nmax_concurrency = 8\ntimeout_seconds = 60\n").unwrap();
        let mut args = make_args();
        args.max_concurrency = Some(2);
        args.specialist_model = Some("from-cli".to_string());
        args.specialists = Some(vec!["security".to_string(), " ".to_string()]);
        args.no_recommendations = true;

        config.merge_with_args(&args);
        assert_eq!(config.run.max_concurrency, 2);
        assert_eq!(config.run.timeout_seconds, 60);
        assert_eq!(config.model.specialist_model, "from-cli");
        assert_eq!(config.run.specialists, vec!["security"]);
        assert!(!config.enrichment.enabled);
    }

    #[test]
    fn test_to_run_config() {
        let mut config = Config::default();
        config.run.specialists = vec!["security".to_string(), "design".to_string()];
        config.run.run_timeout_seconds = Some(600);
        config.triage.final_review = true;

        let run = assert_ok!(config.to_run_config(Some("rules")));
        let names: Vec<_> = run.specialists.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["security", "design"]);
        assert_eq!(run.per_agent_timeout, Duration::from_secs(300));
        assert_eq!(run.run_timeout, Some(Duration::from_secs(600)));
        assert_eq!(run.retry_backoff, Duration::from_millis(1000));
        assert!(run.specialists[0].instructions.contains("rules"));

        let enrichment = run.enrichment.unwrap();
        assert_eq!(enrichment.recommender.name, "recommendations");
        assert_eq!(enrichment.batch_size, 20);
        assert_eq!(run.triage.final_review.map(|s| s.name), Some("triage".to_string()));
    }

    #[test]
    fn test_to_run_config_rejects_bad_values() {
        let mut config = Config::default();
        config.run.specialists = vec!["nonexistent".to_string()];
        assert_err!(config.to_run_config(None));

        let mut config = Config::default();
        config.run.max_concurrency = 0;
        assert_err!(config.to_run_config(None));

        let mut config = Config::default();
        config.enrichment.batch_size = 0;
        assert_err!(config.to_run_config(None));
    }

    #[test]
    fn test_load_from_repo() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from_repo(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[run]\nmode = \"triage\"\n").unwrap();
        let config = Config::load_from_repo(dir.path()).unwrap().unwrap();
        assert_eq!(config.run.mode, ExecutionMode::Triage);

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[run\n").unwrap();
        assert!(Config::load_from_repo(dir.path()).is_err());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[run]"));
        assert!(toml_str.contains("[enrichment]"));
        assert!(toml_str.contains("[scanner]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.run.max_concurrency, 4);
        assert_eq!(parsed.model.api_key_env, "OPENAI_API_KEY");
    }
}
