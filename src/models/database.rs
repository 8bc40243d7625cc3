//! Database strategy and connection models
//!
//! Defines how concurrent workers are isolated from each other on the
//! shared database, and how a single logical database is reached.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation policy for the shared database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStrategy {
    /// All workers share one database; every case runs inside a
    /// transaction that is rolled back afterwards
    #[default]
    Transaction,
    /// Every requested database is created before the run and dropped after
    Separate,
}

impl DatabaseStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseStrategy::Transaction => "transaction",
            DatabaseStrategy::Separate => "separate",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<DatabaseStrategy> {
        match s.trim().to_lowercase().as_str() {
            "transaction" | "transactions" => Some(DatabaseStrategy::Transaction),
            "separate" | "separate-databases" => Some(DatabaseStrategy::Separate),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Supported database adapters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseAdapter {
    #[default]
    #[serde(alias = "postgres")]
    Postgresql,
}

/// Everything needed to reach one logical database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default)]
    pub adapter: DatabaseAdapter,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    pub database: String,

    /// Database to connect to when creating or dropping `database`
    #[serde(default = "default_maintenance_database")]
    pub maintenance_database: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_maintenance_database() -> String {
    "postgres".to_string()
}

impl ConnectionDescriptor {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            adapter: DatabaseAdapter::default(),
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            database: database.into(),
            maintenance_database: default_maintenance_database(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Copy of this descriptor pointing at another database
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}
