//! SkillGauge - skill evaluation CLI
//!
//! The `skillgauge` command runs a benchmark spec against an agent executor
//! and reports how well the agent (and its skills) did.
//!
//! ## Commands
//!
//! - `run`: Evaluate a spec and print a summary or the JSON outcome
//! - `cache clear`: Remove cached task outcomes
//!
//! ## Exit codes
//!
//! - `0`: every task passed
//! - `1`: at least one task failed grading
//! - `2`: configuration or pre-run error (clap usage errors included)

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn, Level};

use skillgauge_core::cache::CacheStore;
use skillgauge_core::{
    cancel_pair, render_summary, write_outcome_json, AgentExecutor, Engine, ExitStatus,
    FsCacheStore, MockExecutor, RunControl, RunOptions, RunPlan, DEFAULT_CACHE_DIR,
};

#[derive(Parser)]
#[command(name = "skillgauge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate coding-agent skills against benchmark specs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark spec
    Run(RunArgs),

    /// Manage the outcome cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the spec file (YAML)
    spec: PathBuf,

    /// Run tasks concurrently
    #[arg(long)]
    parallel: bool,

    /// Run tasks one at a time
    #[arg(long)]
    no_parallel: bool,

    /// Worker count when running concurrently
    #[arg(long, env = "SKILLGAUGE_WORKERS")]
    workers: Option<usize>,

    /// Stop dispatching tasks after the first error
    #[arg(long)]
    fail_fast: bool,

    /// Reuse cached task outcomes
    #[arg(long)]
    cache: bool,

    /// Always execute, ignoring the cache
    #[arg(long)]
    no_cache: bool,

    /// Cache directory
    #[arg(long, env = "SKILLGAUGE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Only run tasks whose id or name matches (repeatable, glob)
    #[arg(long = "task", value_name = "PATTERN")]
    tasks: Vec<String>,

    /// Only run tasks with a matching tag (repeatable, glob)
    #[arg(long = "tags", value_name = "PATTERN")]
    tags: Vec<String>,

    /// Attempts per trial while graders fail
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Also run every task without skills and report the impact
    #[arg(long)]
    baseline: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "default")]
    format: OutputFormat,

    /// Also write the JSON outcome to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached outcome
    Clear {
        /// Cache directory
        #[arg(long, env = "SKILLGAUGE_CACHE_DIR")]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Default,
    Json,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            parallel: flag_pair(self.parallel, self.no_parallel),
            workers: self.workers,
            fail_fast: self.fail_fast.then_some(true),
            max_attempts: self.max_attempts,
            cache: self.cache && !self.no_cache,
            cache_dir: self.cache_dir.clone(),
            task_patterns: self.tasks.clone(),
            tag_patterns: self.tags.clone(),
            baseline: self.baseline,
        }
    }
}

/// `--x` / `--no-x` into an override; neither keeps the spec's value.
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    skillgauge_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Cache {
            action: CacheAction::Clear { cache_dir },
        } => cmd_cache_clear(cache_dir.as_deref()).await,
    };

    match result {
        Ok(status) => ExitCode::from(status.code() as u8),
        Err(e) => {
            error!(error = %e, "skillgauge failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(ExitStatus::ConfigError.code() as u8)
        }
    }
}

fn build_executor(plan: &RunPlan) -> Result<Arc<dyn AgentExecutor>> {
    let config = &plan.spec.config;
    match config.executor.as_str() {
        "mock" => Ok(Arc::new(MockExecutor::new(config.model.clone()))),
        other => bail!("unknown executor {:?} (built in: mock)", other),
    }
}

async fn cmd_run(args: &RunArgs) -> Result<ExitStatus> {
    let plan = RunPlan::from_path(&args.spec, &args.options())
        .with_context(|| format!("load spec {:?}", args.spec))?;
    let executor = build_executor(&plan)?;
    let engine = Engine::new(Arc::clone(&executor));

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; canceling run");
            cancel.cancel();
        }
    });

    let control = RunControl {
        cancel: signal,
        progress: Arc::new(AtomicUsize::new(0)),
    };
    let result = engine.run_controlled(&plan, control).await;

    if let Err(e) = executor.shutdown().await {
        warn!(error = %e, executor = executor.name(), "executor shutdown failed");
    }
    let outcome = result.context("run failed before grading")?;

    if let Some(path) = &args.output {
        write_outcome_json(path, &outcome)?;
        info!(path = %path.display(), "outcome written");
    }

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
            println!("{}", json);
        }
        OutputFormat::Default => print!("{}", render_summary(&outcome)),
    }

    Ok(outcome.exit_status())
}

async fn cmd_cache_clear(cache_dir: Option<&Path>) -> Result<ExitStatus> {
    let dir = cache_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    let store = FsCacheStore::new(&dir);
    let removed = store
        .clear()
        .await
        .with_context(|| format!("clear cache {:?}", dir))?;
    println!("Removed {} cached outcome(s) from {}", removed, dir.display());
    Ok(ExitStatus::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            Commands::Cache { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_flags_map_to_options() {
        let args = parse(&[
            "skillgauge",
            "run",
            "eval.yaml",
            "--no-parallel",
            "--cache",
            "--task",
            "fix-*",
            "--task",
            "lint",
            "--max-attempts",
            "3",
            "--format",
            "json",
        ]);
        let options = args.options();
        assert_eq!(options.parallel, Some(false));
        assert!(options.cache);
        assert_eq!(options.task_patterns, vec!["fix-*", "lint"]);
        assert_eq!(options.max_attempts, Some(3));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_defaults_keep_spec_settings() {
        let options = parse(&["skillgauge", "run", "eval.yaml"]).options();
        assert_eq!(options.parallel, None);
        assert_eq!(options.fail_fast, None);
        assert!(!options.cache);
        assert!(!options.baseline);
    }

    #[test]
    fn test_no_cache_wins() {
        let options = parse(&["skillgauge", "run", "eval.yaml", "--cache", "--no-cache"]).options();
        assert!(!options.cache);
    }

    #[test]
    fn test_usage_error_exits_two() {
        let err = Cli::try_parse_from(["skillgauge", "run"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_cache_clear_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let status = cmd_cache_clear(Some(&dir.path().join("absent")))
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Passed);
    }
}
