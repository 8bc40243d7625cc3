//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{parse_strategy, AppConfig};

/// Run test cases in parallel with database isolation
#[derive(Parser, Debug)]
#[command(name = "shardrun")]
#[command(version)]
#[command(about = "Run test cases in parallel with per-worker database isolation")]
#[command(override_usage = "shardrun [OPTIONS] [PATHS]... [-- <ARGS>...]")]
pub struct Args {
    /// Case files or directories (default: the configured case directory)
    pub paths: Vec<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub processors: Option<usize>,

    /// Database strategy (transaction, separate)
    #[arg(long = "db-strategy")]
    pub db_strategy: Option<String>,

    /// Database names for the separate strategy (repeatable or comma-separated)
    #[arg(long = "database", value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report format (text, json)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write a default configuration file to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub init_config: Option<PathBuf>,

    /// Overwrite an existing file with --init-config
    #[arg(long, requires = "init_config")]
    pub force: bool,

    /// Arguments passed verbatim to every case
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl Args {
    /// Apply command-line overrides on top of `config`
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(processors) = self.processors {
            config.processors = processors;
        }
        if let Some(strategy) = &self.db_strategy {
            config.db_strategy = parse_strategy(strategy)?;
        }
        if !self.databases.is_empty() {
            config.databases = self.databases.clone();
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(())
    }
}
