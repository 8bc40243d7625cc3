//! Runnable cases
//!
//! A case is the smallest unit the pool executes. Cases are loaded from
//! case files, grouped, and handed to workers as boxed [`TestCase`]s.

#![allow(dead_code)]

mod command;
mod file;

pub use command::{CommandCase, CommandSpec};
pub use file::{discover, load_cases, CaseFile};

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::database::DatabaseSession;
use crate::models::{ConnectionDescriptor, Outcome};

/// Named collection of cases sharing setup context
#[derive(Clone, Debug, Default)]
pub struct TestGroup {
    pub name: String,
    /// File the group was loaded from
    pub source: PathBuf,
    /// Directory cases of this group run in
    pub workdir: PathBuf,
    /// Environment shared by every case of the group
    pub env: BTreeMap<String, String>,
}

impl TestGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Everything a worker hands to the case it is executing
pub struct CaseContext<'a> {
    pub worker: usize,
    /// Database the case should use, if a database is enabled
    pub database: Option<&'a ConnectionDescriptor>,
    /// The worker's connection, open inside the case's transaction
    pub session: Option<&'a mut dyn DatabaseSession>,
    /// Arguments passed through after `--`
    pub extra_args: &'a [String],
}

impl<'a> CaseContext<'a> {
    pub fn detached(worker: usize, extra_args: &'a [String]) -> Self {
        Self {
            worker,
            database: None,
            session: None,
            extra_args,
        }
    }
}

/// A runnable case
pub trait TestCase: Send {
    fn description(&self) -> &str;

    fn group(&self) -> &TestGroup;

    /// Run the case and classify how it went
    fn execute(&self, ctx: &mut CaseContext<'_>) -> Outcome;
}

#[cfg(test)]
pub use fn_case::FnCase;
