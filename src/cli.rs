//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::ExecutionMode;
use crate::report::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Swarmlint - multi-agent repository linter
///
/// Runs a set of specialist LLM analyzers (duplication, design, structure,
/// complexity, typing/docs, error handling, testing, security) over a local
/// repository and merges their findings into one deduplicated report.
///
/// Examples:
///   swarmlint ./my-project
///   swarmlint ./my-project --mode triage --format human
///   swarmlint ./my-project --specialists security,error_handling --out lint.json
///   swarmlint --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to the repository root to lint
    #[arg(value_name = "REPO_PATH", required_unless_present = "init_config")]
    pub repo_path: Option<PathBuf>,

    /// Directory containing .md/.txt best-practice files
    #[arg(long, value_name = "DIR")]
    pub rules_path: Option<PathBuf>,

    /// Extra guidance appended to the rules
    #[arg(long, value_name = "TEXT")]
    pub prompt_overrides: Option<String>,

    /// Output format
    #[arg(long, default_value = "json", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Execution mode (default: from config or parallel)
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ExecutionMode>,

    /// JSON indent (when --format=json); 0 prints a single line
    #[arg(long, default_value = "2", value_name = "N")]
    pub indent: usize,

    /// Write output to a file (prints to stdout if omitted)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Logging level
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    pub log_level: LogLevel,

    /// Enable verbose logging output (same as --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,

    /// Model for specialist agents
    #[arg(long, value_name = "MODEL", env = "SWARMLINT_SPECIALIST_MODEL")]
    pub specialist_model: Option<String>,

    /// Model for the triage agent
    #[arg(long, value_name = "MODEL", env = "SWARMLINT_TRIAGE_MODEL")]
    pub triage_model: Option<String>,

    /// Model for the recommendations agent
    #[arg(long, value_name = "MODEL", env = "SWARMLINT_RECOMMENDATIONS_MODEL")]
    pub recommendations_model: Option<String>,

    /// Maximum number of specialist calls in flight
    #[arg(long, value_name = "NUM")]
    pub max_concurrency: Option<usize>,

    /// Per-specialist timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Global deadline for all specialists, in seconds
    ///
    /// Specialists still running when it expires are recorded as timeouts.
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Run only these specialists, in this order (comma-separated)
    ///
    /// Example: --specialists security,error_handling
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub specialists: Option<Vec<String>>,

    /// Skip the recommendations pass
    #[arg(long)]
    pub no_recommendations: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .swarmlint.toml in the current directory,
    /// then in the repository root
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// OpenAI-compatible API base URL
    #[arg(long, value_name = "URL", env = "SWARMLINT_API_URL")]
    pub api_url: Option<String>,

    /// Generate a default .swarmlint.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match self.repo_path {
            Some(ref path) if !path.exists() => {
                return Err(format!("Repository path does not exist: {}", path.display()));
            }
            Some(ref path) if !path.is_dir() => {
                return Err(format!("Repository path is not a directory: {}", path.display()));
            }
            Some(_) => {}
            None => return Err("Repository path is required".to_string()),
        }

        if self.max_concurrency == Some(0) {
            return Err("Max concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.run_timeout == Some(0) {
            return Err("Run timeout must be at least 1 second".to_string());
        }

        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref names) = self.specialists {
            if names.iter().all(|n| n.trim().is_empty()) {
                return Err("--specialists must name at least one specialist".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        if self.verbose {
            return tracing::Level::DEBUG;
        }
        match self.log_level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Repository path; empty when only `--init-config` was given.
    pub fn repo_path(&self) -> PathBuf {
        self.repo_path.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_args(repo: &std::path::Path) -> Args {
        Args {
            repo_path: Some(repo.to_path_buf()),
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
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "swarmlint",
            "./repo",
            "--mode",
            "triage",
            "--format",
            "human",
            "--specialists",
            "security,testing",
            "--max-concurrency",
            "2",
            "--no-recommendations",
        ])
        .unwrap();

        assert_eq!(args.repo_path, Some(PathBuf::from("./repo")));
        assert_eq!(args.mode, Some(ExecutionMode::Triage));
        assert_eq!(args.format, OutputFormat::Human);
        assert_eq!(
            args.specialists,
            Some(vec!["security".to_string(), "testing".to_string()])
        );
        assert_eq!(args.max_concurrency, Some(2));
        assert!(args.no_recommendations);
        assert_eq!(args.indent, 2);
    }

    #[test]
    fn test_repo_path_required_unless_init_config() {
        assert!(Args::try_parse_from(["swarmlint"]).is_err());
        let args = Args::try_parse_from(["swarmlint", "--init-config"]).unwrap();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_repo() {
        let dir = TempDir::new().unwrap();
        let args = make_args(&dir.path().join("missing"));
        assert!(args.validate().is_err());

        let file = dir.path().join("file.py");
        std::fs::write(&file, "x = 1").unwrap();
        assert!(make_args(&file).validate().is_err());

        assert!(make_args(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validation_limits() {
        let dir = TempDir::new().unwrap();

        let mut args = make_args(dir.path());
        args.max_concurrency = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args(dir.path());
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args(dir.path());
        args.api_url = Some("api.openai.com".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let dir = TempDir::new().unwrap();
        let mut args = make_args(dir.path());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let dir = TempDir::new().unwrap();
        let mut args = make_args(dir.path());
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.log_level = LogLevel::Warn;
        assert_eq!(args.log_level(), tracing::Level::WARN);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
