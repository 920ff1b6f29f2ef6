//! Swarmlint - multi-agent repository linter
//!
//! Runs specialist LLM analyzers over a local repository, in parallel or
//! under a sequential triage coordinator, and merges their findings into a
//! single deduplicated report with optional fix recommendations.
//!
//! Exit codes:
//!   0 - Run completed (individual specialist failures are reported, not fatal)
//!   1 - Configuration/IO error, or every specialist failed permanently

mod agent;
mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod orchestrator;
mod report;
mod rules;
mod scanner;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use orchestrator::Orchestrator;
use report::OutputFormat;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Variables from ./.env must be visible to clap's env fallbacks.
    dotenv::dotenv().ok();

    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Swarmlint v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_lint(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Lint failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .swarmlint.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit it manually.", CONFIG_FILE_NAME);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("Created {} with default settings.", CONFIG_FILE_NAME);
    println!("Edit it to customize models, specialists, enrichment, and scanning.");
    Ok(())
}

/// Initialize logging. `RUST_LOG`, when set, wins over the CLI level.
fn init_logging(args: &Args) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
    } else {
        let subscriber = builder.with_max_level(args.log_level()).finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
    }
}

/// Run the complete lint workflow. Returns the exit code.
async fn run_lint(args: Args) -> Result<i32> {
    let repo_path = args.repo_path();

    // A repository .env may define the API key or model variables; re-read
    // the arguments so clap sees them. Existing variables are never replaced.
    let args = if dotenv::from_path(repo_path.join(".env")).is_ok() {
        debug!("Loaded {}", repo_path.join(".env").display());
        Args::parse_args()
    } else {
        args
    };

    // Load configuration
    let mut config = load_config(&args, &repo_path)?;
    config.merge_with_args(&args);

    // Rules and overrides are fixed for the whole run.
    let rules_text = match args.rules_path {
        Some(ref path) => rules::load_rules_text(path)?,
        None => None,
    };
    let rules_text = rules::combine(rules_text, args.prompt_overrides.as_deref());

    let scan_config = scanner::ScanConfig::from(&config.scanner);
    let context = scanner::RepositoryContext::discover(&repo_path, scan_config, rules_text.clone())?;
    if context.files.is_empty() {
        warn!("No matching source files found under {}", context.root.display());
    }

    let run_config = config.to_run_config(rules_text.as_deref())?;
    info!(
        "Models: specialist={}, triage={}, recommendations={}",
        config.model.specialist_model, config.model.triage_model, config.model.recommendations_model
    );

    let backend = agent::HttpBackend::new(config.backend_config())?;
    let mut orchestrator = Orchestrator::new(Arc::new(backend), Arc::new(run_config));
    if let Some(bar) = progress_bar(&args) {
        orchestrator = orchestrator.with_progress(bar);
    }

    let outcome = orchestrator.run(Arc::new(context)).await?;

    let rendered = match args.format {
        OutputFormat::Json => report::generate_json_report(&outcome.report, args.indent)?,
        OutputFormat::Human => report::generate_human_report(&outcome.report),
    };
    report::write_output(&rendered, args.out.as_deref())?;
    if let Some(ref out) = args.out {
        info!("Wrote linter output to {}", out.display());
    }

    if let Some(ref stats) = outcome.enrichment {
        debug!("Enrichment: {:?}", stats);
    }

    if outcome.all_failed_permanently() {
        error!("Every specialist failed with a non-retryable error");
        return Ok(1);
    }

    let failed = outcome.report.failed_agents();
    if !failed.is_empty() {
        warn!("Completed with failed agents: {}", failed.join(", "));
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Explicit `--config` first, then the working directory, then the repository.
fn load_config(args: &Args, repo_path: &Path) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    if let Some(config) = Config::load_default()? {
        info!("Loaded config from {}", CONFIG_FILE_NAME);
        return Ok(config);
    }

    match Config::load_from_repo(repo_path)? {
        Some(config) => {
            info!("Found {} in repository", CONFIG_FILE_NAME);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Progress on stderr, only for interactive runs.
fn progress_bar(args: &Args) -> Option<ProgressBar> {
    if args.quiet || !std::io::stderr().is_terminal() {
        return None;
    }

    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}
