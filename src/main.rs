//! shardrun - Parallel Test Runner with Database Isolation
//!
//! A CLI tool that distributes test cases across a pool of workers and keeps
//! each worker's database state isolated from the others.
//!
//! ## Features
//!
//! - Parallel execution on a fixed pool of OS-thread workers
//! - Transaction strategy: one truncation, then a rolled-back transaction per case
//! - Separate strategy: one database per worker, created and dropped around the run
//! - Results reported in input order regardless of completion order
//! - Text and JSON reports
//!
//! ## Usage
//!
//! ```bash
//! # Run every case under ./cases on 4 workers
//! shardrun
//!
//! # Run a directory on 8 workers with one database per worker
//! shardrun -p 8 --db-strategy separate --database app_test_1,app_test_2 cases/billing
//!
//! # Pass arguments through to every case
//! shardrun cases -- --seed 42
//!
//! # Write a starter configuration file
//! shardrun --init-config shardrun.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

mod cases;
mod cli;
mod config;
mod database;
mod executor;
mod models;
mod output;
mod utils;

use cli::Args;
use config::{AppConfig, EnvConfig};
use executor::{Orchestrator, RunOptions};

/// Exit status for a run with failing cases or no cases at all
const EXIT_FAILURES: u8 = 1;
/// Exit status for configuration, loading or fatal lifecycle errors
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    if let Some(path) = &args.init_config {
        init_config(path, args.force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let env = EnvConfig::load();
    let explicit = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let (mut config, source) = config::load_config(explicit.as_deref())?;
    config.apply_env(&env)?;
    args.apply(&mut config)?;
    config.validate()?;

    utils::init_logger(config.effective_log_level());
    match &source {
        Some(path) => debug!("Using configuration from {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }
    if env.has_any() {
        debug!("Applied SHARDRUN_* environment overrides");
    }

    let files = cases::discover(&args.paths, &config.case_dir)?;
    if files.is_empty() {
        println!("No test cases found");
        return Ok(ExitCode::from(EXIT_FAILURES));
    }

    let cases = cases::load_cases(&files)?;
    if cases.is_empty() {
        println!("No test cases found");
        return Ok(ExitCode::from(EXIT_FAILURES));
    }
    info!(
        "Loaded {} case(s) from {} file(s) on {} worker(s)",
        cases.len(),
        files.len(),
        config.processors
    );

    let report = Orchestrator::new(RunOptions::from_config(&config, args.extra_args))
        .run(cases)
        .await?;

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILURES))
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            path.display()
        );
    }

    AppConfig::default().save(path)?;
    println!("Configuration file created: {}", path.display());
    Ok(())
}
