//! Shared database lifecycle
//!
//! The capabilities a database must offer to the runner, and the strategy
//! manager that drives them around a run.

mod manager;
mod postgres;

#[cfg(test)]
pub mod testing;

pub use manager::{DatabaseManager, UnitScope};
pub use postgres::PsqlBackend;

use thiserror::Error;

use crate::models::ConnectionDescriptor;

/// Database lifecycle errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("{command} failed for {target}: {message}")]
    Command {
        command: &'static str,
        target: String,
        message: String,
    },

    #[error("Database session error: {0}")]
    Session(String),

    #[error("Failed to drop {} database(s): {}", .failures.len(), .failures.join("; "))]
    Teardown { failures: Vec<String> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whole-database operations, shared by every worker
pub trait DatabaseBackend: Send + Sync {
    /// Check that the template database can be reached
    fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError>;

    fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError>;

    fn drop_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError>;

    /// Remove every row from every table
    fn truncate_all(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError>;

    /// Open a connection owned by a single worker
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError>;
}

/// One open connection; transactional state is scoped to it
pub trait DatabaseSession: Send {
    fn begin(&mut self) -> Result<(), DatabaseError>;

    fn rollback(&mut self) -> Result<(), DatabaseError>;

    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;
}
