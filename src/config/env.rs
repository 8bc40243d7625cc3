//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "SHARDRUN";

/// Configuration read from `SHARDRUN_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// SHARDRUN_PROCESSORS
    pub processors: Option<usize>,
    /// SHARDRUN_DB_STRATEGY
    pub db_strategy: Option<String>,
    /// SHARDRUN_DATABASES, comma-separated
    pub databases: Option<Vec<String>>,
    /// SHARDRUN_CASE_DIR
    pub case_dir: Option<String>,
    /// SHARDRUN_LOG_LEVEL
    pub log_level: Option<String>,
    /// SHARDRUN_VERBOSE
    pub verbose: Option<bool>,
    /// SHARDRUN_FORMAT
    pub format: Option<String>,
    /// SHARDRUN_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.trim().is_empty())
        };

        Self {
            processors: get("PROCESSORS").and_then(|v| v.trim().parse().ok()),
            db_strategy: get("DB_STRATEGY"),
            databases: get("DATABASES").map(|v| split_list(&v)),
            case_dir: get("CASE_DIR"),
            log_level: get("LOG_LEVEL"),
            verbose: get("VERBOSE").map(|v| parse_bool(&v)),
            format: get("FORMAT"),
            config_file: get("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.processors.is_some()
            || self.db_strategy.is_some()
            || self.databases.is_some()
            || self.case_dir.is_some()
            || self.log_level.is_some()
            || self.verbose.is_some()
            || self.format.is_some()
            || self.config_file.is_some()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}
