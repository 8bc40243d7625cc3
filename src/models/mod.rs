//! Data models for parallel case execution
//!
//! This module contains the data structures shared by the executor,
//! the database manager and the reporter.

mod database;
mod outcome;

pub use database::{ConnectionDescriptor, DatabaseAdapter, DatabaseStrategy};
pub use outcome::{ExecutionResult, FailureKind, Outcome, ReportEntry, RunReport};
