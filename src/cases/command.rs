//! Shell command cases
//!
//! A command case runs `sh -c <run>` and judges the result by exit status
//! and, optionally, by what the command printed.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::debug;

use super::{CaseContext, TestCase, TestGroup};
use crate::models::Outcome;

/// Environment variable carrying the worker index
pub const WORKER_ENV: &str = "SHARDRUN_WORKER";

/// Environment variable carrying the worker's database name
pub const DATABASE_ENV: &str = "SHARDRUN_DATABASE";

/// A case as written in a case file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandSpec {
    pub description: String,

    /// Shell snippet to run
    pub run: String,

    /// Statements run on the worker's session before `run`
    #[serde(default)]
    pub sql: Vec<String>,

    #[serde(default)]
    pub expect_status: i32,

    /// Substring the command's stdout must contain
    #[serde(default)]
    pub expect_output: Option<String>,
}

impl CommandSpec {
    pub fn new(description: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            run: run.into(),
            sql: Vec::new(),
            expect_status: 0,
            expect_output: None,
        }
    }

    pub fn expect_status(mut self, status: i32) -> Self {
        self.expect_status = status;
        self
    }

    pub fn expect_output(mut self, output: impl Into<String>) -> Self {
        self.expect_output = Some(output.into());
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql.push(sql.into());
        self
    }
}

/// Case that runs a shell command
pub struct CommandCase {
    group: Arc<TestGroup>,
    spec: CommandSpec,
}

impl CommandCase {
    pub fn new(group: Arc<TestGroup>, spec: CommandSpec) -> Self {
        Self { group, spec }
    }

    fn label(&self) -> String {
        format!("{} {}", self.group.name, self.spec.description)
    }

    fn command(&self, ctx: &CaseContext<'_>) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.spec.run)
            .arg(&self.group.name)
            .args(ctx.extra_args)
            .envs(&self.group.env)
            .env(WORKER_ENV, ctx.worker.to_string())
            .stdin(Stdio::null());

        if let Some(database) = ctx.database {
            command.env(DATABASE_ENV, &database.database);
        }
        if !self.group.workdir.as_os_str().is_empty() {
            command.current_dir(&self.group.workdir);
        }
        command
    }
}

impl TestCase for CommandCase {
    fn description(&self) -> &str {
        &self.spec.description
    }

    fn group(&self) -> &TestGroup {
        &self.group
    }

    fn execute(&self, ctx: &mut CaseContext<'_>) -> Outcome {
        match ctx.session.as_deref_mut() {
            Some(session) => {
                for sql in &self.spec.sql {
                    if let Err(e) = session.execute(sql) {
                        return Outcome::unexpected(format!("{}: SQL failed: {e}", self.label()));
                    }
                }
            }
            None if !self.spec.sql.is_empty() => {
                debug!("{}: no database session, skipping SQL", self.label());
            }
            None => {}
        }

        let output = match self.command(ctx).output() {
            Ok(output) => output,
            Err(e) => {
                return Outcome::unexpected(format!("{}: failed to spawn: {e}", self.label()));
            }
        };

        let Some(code) = output.status.code() else {
            return Outcome::unexpected(format!("{}: terminated by signal", self.label()));
        };

        if code != self.spec.expect_status {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!(
                "{}: expected exit status {}, got {}",
                self.label(),
                self.spec.expect_status,
                code
            );
            if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                message.push_str(&format!(" ({})", last.trim()));
            }
            return Outcome::expectation(message);
        }

        if let Some(expected) = &self.spec.expect_output {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.contains(expected.as_str()) {
                return Outcome::expectation(format!(
                    "{}: expected output to contain {:?}",
                    self.label(),
                    expected
                ));
            }
        }

        Outcome::Success
    }
}
