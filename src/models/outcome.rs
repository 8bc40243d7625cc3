//! Case outcome models
//!
//! Defines the per-case outcome, the execution result and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of executing a single case
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// An assertion made by the case did not hold
    ExpectationFailure(String),
    /// Any other fault raised while executing the case
    UnexpectedError(String),
}

impl Outcome {
    pub fn expectation(message: impl Into<String>) -> Self {
        Outcome::ExpectationFailure(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Outcome::UnexpectedError(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Failure kind, `None` for a success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success => None,
            Outcome::ExpectationFailure(_) => Some(FailureKind::Failure),
            Outcome::UnexpectedError(_) => Some(FailureKind::Error),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::ExpectationFailure(msg) | Outcome::UnexpectedError(msg) => Some(msg),
        }
    }
}

/// Report label of a non-success outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Failure,
    Error,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Failure => write!(f, "Failure"),
            FailureKind::Error => write!(f, "Error"),
        }
    }
}

/// Result of one executed case
///
/// Exactly one result exists per submitted case, at the same position as
/// the case in the submitted sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub group: String,
    pub description: String,
    pub worker: usize,
    pub duration_ms: u64,
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn new(
        group: impl Into<String>,
        description: impl Into<String>,
        worker: usize,
        duration_ms: u64,
        outcome: Outcome,
    ) -> Self {
        Self {
            group: group.into(),
            description: description.into(),
            worker,
            duration_ms,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// One failing case as it appears in the report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportEntry {
    pub group: String,
    pub description: String,
    pub kind: FailureKind,
    pub message: String,
    pub duration_ms: u64,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failing results of a run, in submission order, plus run totals
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failures: Vec<ReportEntry>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(results: &[ExecutionResult]) -> Self {
        let failures: Vec<ReportEntry> = results
            .iter()
            .filter_map(|r| {
                let kind = r.outcome.failure_kind()?;
                Some(ReportEntry {
                    group: r.group.clone(),
                    description: r.description.clone(),
                    kind,
                    message: r.outcome.message().unwrap_or_default().to_string(),
                    duration_ms: r.duration_ms,
                })
            })
            .collect();

        Self {
            total: results.len(),
            passed: results.len() - failures.len(),
            failures,
            finished_at: Utc::now(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
