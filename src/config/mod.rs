//! Configuration module
//!
//! Handles loading and layering configuration. The value is built once in
//! `main` (defaults, then file, then environment, then CLI flags) and passed
//! down by reference.

mod env;
mod file;

pub use env::EnvConfig;
pub use file::load_config;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{ConnectionDescriptor, DatabaseStrategy};
use crate::output::OutputFormat;
use crate::utils::LogLevel;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Number of parallel workers
    pub processors: usize,

    /// Directory searched when no case paths are given
    pub case_dir: PathBuf,

    /// Database isolation strategy
    pub db_strategy: DatabaseStrategy,

    /// Databases created for the separate strategy
    pub databases: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Enable verbose status output
    pub verbose: bool,

    /// Report format (text, json)
    pub format: String,

    /// Template connection for the test database
    pub database: Option<ConnectionDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            processors: 4,
            case_dir: PathBuf::from("cases"),
            db_strategy: DatabaseStrategy::Transaction,
            databases: Vec::new(),
            log_level: "warn".to_string(),
            verbose: false,
            format: "text".to_string(),
            database: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if file::is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<()> {
        if let Some(processors) = env.processors {
            self.processors = processors;
        }
        if let Some(strategy) = &env.db_strategy {
            self.db_strategy = parse_strategy(strategy)?;
        }
        if let Some(databases) = &env.databases {
            self.databases = databases.clone();
        }
        if let Some(case_dir) = &env.case_dir {
            self.case_dir = PathBuf::from(case_dir);
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
        if let Some(verbose) = env.verbose {
            self.verbose = verbose;
        }
        if let Some(format) = &env.format {
            self.format = format.clone();
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processors == 0 {
            anyhow::bail!("processors must be at least 1");
        }
        if self.db_strategy == DatabaseStrategy::Separate && self.databases.is_empty() {
            anyhow::bail!("The separate database strategy needs at least one database name");
        }
        if let Some(name) = self.databases.iter().find(|d| d.trim().is_empty()) {
            anyhow::bail!("Invalid database name: {name:?}");
        }
        if LogLevel::from_str(&self.log_level).is_none() {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }
        if OutputFormat::from_str(&self.format).is_none() {
            anyhow::bail!("Unknown output format: {}", self.format);
        }
        Ok(())
    }

    /// Effective log level; verbose output needs at least `info`
    pub fn effective_log_level(&self) -> LogLevel {
        let level = LogLevel::from_str(&self.log_level).unwrap_or(LogLevel::Warn);
        if self.verbose {
            level.at_least(LogLevel::Info)
        } else {
            level
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_str(&self.format).unwrap_or(OutputFormat::Text)
    }
}

/// Parse a strategy name into a [`DatabaseStrategy`]
pub fn parse_strategy(s: &str) -> Result<DatabaseStrategy> {
    DatabaseStrategy::from_str(s).ok_or_else(|| {
        anyhow::anyhow!("Unknown database strategy: {s} (expected transaction or separate)")
    })
}
