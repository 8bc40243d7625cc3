//! Run orchestration
//!
//! Sets up the database strategy, dispatches every case to the worker
//! pool, tears the database down again and reports the failures.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use super::pool::WorkerPool;
use crate::cases::TestCase;
use crate::config::AppConfig;
use crate::database::{DatabaseBackend, DatabaseError, DatabaseManager, PsqlBackend};
use crate::models::{ConnectionDescriptor, DatabaseStrategy, RunReport};
use crate::output::{OutputFormat, Reporter};
use crate::utils::Timer;

/// Parameters of a single run
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub workers: usize,
    pub strategy: DatabaseStrategy,
    pub databases: Vec<String>,
    pub database: Option<ConnectionDescriptor>,
    pub verbose: bool,
    pub format: OutputFormat,
    /// Arguments passed through to every case
    pub extra_args: Vec<String>,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig, extra_args: Vec<String>) -> Self {
        Self {
            workers: config.processors,
            strategy: config.db_strategy,
            databases: config.databases.clone(),
            database: config.database.clone(),
            verbose: config.verbose,
            format: config.output_format(),
            extra_args,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), Vec::new())
    }
}

/// Drives one complete run
pub struct Orchestrator {
    options: RunOptions,
    backend: Arc<dyn DatabaseBackend>,
}

impl Orchestrator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            backend: Arc::new(PsqlBackend::new()),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Run every case, print the report and return it
    ///
    /// Teardown runs even when dispatch fails; the dispatch error is
    /// returned afterwards.
    pub async fn run(&self, cases: Vec<Box<dyn TestCase>>) -> Result<RunReport> {
        let timer = Timer::start("run");
        let manager = Arc::new(self.build_manager().await?);

        let setup = manager.clone();
        blocking(move || setup.setup())
            .await
            .context("Database setup failed")?;

        let pool = WorkerPool::new(self.options.workers)
            .with_extra_args(self.options.extra_args.clone());
        let dispatched = pool.run_all(cases, manager.clone()).await;

        let teardown = manager.clone();
        let torn_down = blocking(move || teardown.teardown()).await;

        let results = match (dispatched, torn_down) {
            (Err(e), torn_down) => {
                if let Err(teardown_err) = torn_down {
                    error!("Teardown after aborted run failed: {:#}", teardown_err);
                }
                return Err(e).context("Run aborted");
            }
            (Ok(_), Err(e)) => return Err(e).context("Database teardown failed"),
            (Ok(results), Ok(())) => results,
        };

        let report = RunReport::new(&results);
        info!(
            "Run completed in {}ms - {}/{} passed",
            timer.elapsed_ms(),
            report.passed,
            report.total
        );

        Reporter::new(self.options.format)
            .verbose(self.options.verbose)
            .report(&report)?;

        Ok(report)
    }

    async fn build_manager(&self) -> Result<DatabaseManager> {
        let Some(template) = self.options.database.clone() else {
            info!("No database configured. Skipping database setup.");
            return Ok(DatabaseManager::disabled(self.options.strategy));
        };

        let strategy = self.options.strategy;
        let databases = self.options.databases.clone();
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            DatabaseManager::new(strategy, databases, backend, template)
        })
        .await
        .context("Database probe task failed")
    }
}

/// Run a database lifecycle call off the async threads
async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<(), DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Database task failed")??;
    Ok(())
}
