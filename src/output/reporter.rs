//! Run reporter
//!
//! Renders the failing results of a run, in submission order.

use anyhow::{Context, Result};
use std::io::Write;

use crate::models::RunReport;

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Report renderer
pub struct Reporter {
    format: OutputFormat,
    verbose: bool,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Render a report, `None` when there is nothing to print
    pub fn render(&self, report: &RunReport) -> Result<Option<String>> {
        match self.format {
            OutputFormat::Text => Ok(self.render_text(report)),
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .map(Some)
                .context("Failed to serialize report"),
        }
    }

    fn render_text(&self, report: &RunReport) -> Option<String> {
        if report.is_clean() {
            return self
                .verbose
                .then(|| format!("All {} cases passed", report.total));
        }

        let mut out = format!(
            "Test errors found ({} of {} cases):",
            report.failures.len(),
            report.total
        );
        for entry in &report.failures {
            out.push('\n');
            out.push_str(&entry.to_string());
        }
        Some(out)
    }

    /// Write the rendered report to `out`
    pub fn write_to(&self, report: &RunReport, out: &mut impl Write) -> Result<()> {
        if let Some(rendered) = self.render(report)? {
            writeln!(out, "{rendered}").context("Failed to write report")?;
        }
        Ok(())
    }

    /// Print the report to stdout
    pub fn report(&self, report: &RunReport) -> Result<()> {
        self.write_to(report, &mut std::io::stdout().lock())
    }
}
