//! Worker pool
//!
//! Runs cases on a fixed set of blocking worker threads. Cases are fed
//! through a bounded channel; each worker pulls one case at a time, wraps
//! it in its database scope and writes the result into the slot matching
//! the case's input position.

#![allow(dead_code)]

use futures::future::join_all;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cases::{CaseContext, TestCase};
use crate::database::{DatabaseError, DatabaseManager, UnitScope};
use crate::models::{ExecutionResult, Outcome};
use crate::utils::Timer;

/// Errors that abort a dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker {worker} database lifecycle failed: {source}")]
    Lifecycle {
        worker: usize,
        #[source]
        source: DatabaseError,
    },

    #[error("Worker thread failed: {0}")]
    WorkerPanicked(String),

    #[error("No result recorded for case #{0}")]
    MissingResult(usize),
}

type Queue = Arc<Mutex<mpsc::Receiver<(usize, Box<dyn TestCase>)>>>;
type Slots = Arc<Mutex<Vec<Option<ExecutionResult>>>>;

/// Fixed-size pool of case workers
pub struct WorkerPool {
    workers: usize,
    extra_args: Arc<Vec<String>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            extra_args: Arc::new(Vec::new()),
        }
    }

    /// Arguments handed to every case after `--`
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = Arc::new(args);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every case and return one result per case, in input order
    ///
    /// Case faults are contained in their results. A failure of the
    /// database hooks stops the dispatch and is returned as an error.
    pub async fn run_all(
        &self,
        cases: Vec<Box<dyn TestCase>>,
        manager: Arc<DatabaseManager>,
    ) -> Result<Vec<ExecutionResult>, DispatchError> {
        let total = cases.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.workers.min(total);
        info!("Dispatching {} case(s) across {} worker(s)", total, workers);

        let (tx, rx) = mpsc::channel(workers);
        let queue: Queue = Arc::new(Mutex::new(rx));
        let slots: Slots = Arc::new(Mutex::new(vec![None; total]));
        let abort = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    queue: queue.clone(),
                    slots: slots.clone(),
                    abort: abort.clone(),
                    manager: manager.clone(),
                    extra_args: self.extra_args.clone(),
                };
                tokio::task::spawn_blocking(move || worker.run())
            })
            .collect();
        // Workers own the receiver from here, so a failed pool closes the channel
        drop(queue);

        for (index, case) in cases.into_iter().enumerate() {
            if abort.load(Ordering::SeqCst) || tx.send((index, case)).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut failure = None;
        for joined in join_all(handles).await {
            let result = joined.unwrap_or_else(|e| Err(DispatchError::WorkerPanicked(e.to_string())));
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let slots = std::mem::take(&mut *slots.lock());
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(DispatchError::MissingResult(index)))
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

struct Worker {
    index: usize,
    queue: Queue,
    slots: Slots,
    abort: Arc<AtomicBool>,
    manager: Arc<DatabaseManager>,
    extra_args: Arc<Vec<String>>,
}

impl Worker {
    fn run(self) -> Result<(), DispatchError> {
        let mut scope = self
            .manager
            .worker_scope(self.index)
            .map_err(|e| self.fail(e))?;

        let mut executed = 0usize;
        while !self.abort.load(Ordering::SeqCst) {
            let next = self.queue.lock().blocking_recv();
            let Some((position, case)) = next else {
                break;
            };

            let result = self
                .execute(&mut scope, case.as_ref())
                .map_err(|e| self.fail(e))?;
            self.slots.lock()[position] = Some(result);
            executed += 1;
        }

        debug!("Worker {} finished after {} case(s)", self.index, executed);
        Ok(())
    }

    /// before, execute, after for a single case
    fn execute(
        &self,
        scope: &mut UnitScope,
        case: &dyn TestCase,
    ) -> Result<ExecutionResult, DatabaseError> {
        scope.before_unit()?;

        let timer = Timer::start(case.description());
        let outcome = {
            let (database, session) = scope.parts();
            let mut ctx = CaseContext {
                worker: self.index,
                database,
                session,
                extra_args: &self.extra_args,
            };
            panic::catch_unwind(AssertUnwindSafe(|| case.execute(&mut ctx)))
                .unwrap_or_else(|payload| Outcome::unexpected(panic_message(payload.as_ref())))
        };
        let duration_ms = timer.stop();

        // Reached for every outcome, panics included
        scope.after_unit()?;

        match &outcome {
            Outcome::Success => debug!("Passed: {}", case.description()),
            Outcome::ExpectationFailure(msg) => warn!("Test failed: {}", msg),
            Outcome::UnexpectedError(msg) => error!("Error: {}", msg),
        }

        Ok(ExecutionResult::new(
            case.group().name.clone(),
            case.description(),
            self.index,
            duration_ms,
            outcome,
        ))
    }

    fn fail(&self, source: DatabaseError) -> DispatchError {
        self.abort.store(true, Ordering::SeqCst);
        error!("Worker {} stopping: {}", self.index, source);
        DispatchError::Lifecycle {
            worker: self.index,
            source,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{CommandCase, CommandSpec, FnCase, TestGroup};
    use crate::database::testing::{fake_psql, Call, RecordingBackend};
    use crate::database::PsqlBackend;
    use crate::models::{ConnectionDescriptor, DatabaseStrategy};
    use std::sync::Barrier;
    use std::time::Duration;
    use tempfile::tempdir;

    fn disabled() -> Arc<DatabaseManager> {
        Arc::new(DatabaseManager::disabled(DatabaseStrategy::Transaction))
    }

    fn transaction_manager(backend: &RecordingBackend) -> Arc<DatabaseManager> {
        let manager = DatabaseManager::new(
            DatabaseStrategy::Transaction,
            Vec::new(),
            Arc::new(backend.clone()),
            ConnectionDescriptor::new("app_test"),
        );
        manager.setup().unwrap();
        Arc::new(manager)
    }

    fn passing(description: &str) -> Box<dyn TestCase> {
        FnCase::new(description, |_| Outcome::Success).boxed()
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        // Early cases take longest, so completion order is roughly reversed
        let cases: Vec<Box<dyn TestCase>> = (0..12u64)
            .map(|i| {
                FnCase::new(&format!("case-{i}"), move |_| {
                    std::thread::sleep(Duration::from_millis((12 - i) * 5));
                    Outcome::Success
                })
                .boxed()
            })
            .collect();

        let results = WorkerPool::new(4).run_all(cases, disabled()).await.unwrap();

        let descriptions: Vec<String> = results.iter().map(|r| r.description.clone()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("case-{i}")).collect();
        assert_eq!(descriptions, expected);
    }

    #[tokio::test]
    async fn test_mixed_outcomes_keep_position() {
        let cases = vec![
            FnCase::new("a", |_| Outcome::expectation("expected 1, got 2")).boxed(),
            passing("b"),
            FnCase::new("c", |_| Outcome::unexpected("undefined method")).boxed(),
        ];

        let results = WorkerPool::new(2).run_all(cases, disabled()).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].outcome,
            Outcome::expectation("expected 1, got 2")
        );
        assert_eq!(results[1].outcome, Outcome::Success);
        assert_eq!(results[2].outcome, Outcome::unexpected("undefined method"));
    }

    #[tokio::test]
    async fn test_panicking_case_is_contained() {
        let cases = vec![
            FnCase::new("explodes", |_| panic!("kaboom")).boxed(),
            passing("after"),
        ];

        let results = WorkerPool::new(1).run_all(cases, disabled()).await.unwrap();

        assert_eq!(results[0].outcome, Outcome::unexpected("panicked: kaboom"));
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn test_every_case_is_rolled_back() {
        let backend = RecordingBackend::new();
        let manager = transaction_manager(&backend);
        let cases = vec![
            passing("ok"),
            FnCase::new("fails", |_| Outcome::expectation("nope")).boxed(),
            FnCase::new("errors", |_| Outcome::unexpected("boom")).boxed(),
            FnCase::new("panics", |_| panic!("bad")).boxed(),
            passing("ok again"),
        ];

        let results = WorkerPool::new(2).run_all(cases, manager).await.unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(backend.count(|c| matches!(c, Call::Begin)), 5);
        assert_eq!(backend.count(|c| matches!(c, Call::Rollback)), 5);
        assert_eq!(backend.count(|c| matches!(c, Call::Connect(_))), 2);
    }

    #[tokio::test]
    async fn test_cases_see_worker_session() {
        let backend = RecordingBackend::new();
        let manager = transaction_manager(&backend);
        let cases = vec![FnCase::new("writes", |ctx| {
            match ctx.session.as_deref_mut() {
                Some(session) => session.execute("INSERT INTO t VALUES (1)").unwrap(),
                None => return Outcome::unexpected("no session"),
            }
            Outcome::Success
        })
        .boxed()];

        let results = WorkerPool::new(1).run_all(cases, manager).await.unwrap();

        assert!(results[0].is_success());
        let calls = backend.calls();
        let begin = calls.iter().position(|c| *c == Call::Begin).unwrap();
        let insert = calls
            .iter()
            .position(|c| matches!(c, Call::Execute(_)))
            .unwrap();
        let rollback = calls.iter().position(|c| *c == Call::Rollback).unwrap();
        assert!(begin < insert && insert < rollback);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_fatal() {
        let backend = RecordingBackend::new().fail_rollback();
        let manager = transaction_manager(&backend);
        let cases = vec![passing("a"), passing("b"), passing("c")];

        let err = WorkerPool::new(1).run_all(cases, manager).await.unwrap_err();

        assert!(matches!(err, DispatchError::Lifecycle { worker: 0, .. }));
        // The failed worker stops pulling cases
        assert_eq!(backend.count(|c| matches!(c, Call::Rollback)), 1);
    }

    #[tokio::test]
    async fn test_failed_case_sql_does_not_abort_run() {
        let dir = tempdir().unwrap();
        let backend = PsqlBackend::new().with_binary(fake_psql(dir.path()));
        let manager = DatabaseManager::new(
            DatabaseStrategy::Transaction,
            Vec::new(),
            Arc::new(backend),
            ConnectionDescriptor::new("app_test"),
        );
        manager.setup().unwrap();

        let group = Arc::new(TestGroup::new("accounts"));
        let cases: Vec<Box<dyn TestCase>> = vec![
            Box::new(CommandCase::new(
                group.clone(),
                CommandSpec::new("bad seed", "true").with_sql("SELECT FAIL"),
            )),
            Box::new(CommandCase::new(group, CommandSpec::new("plain", "true"))),
        ];

        let results = WorkerPool::new(1)
            .run_all(cases, Arc::new(manager))
            .await
            .unwrap();

        assert!(matches!(results[0].outcome, Outcome::UnexpectedError(ref msg) if msg.contains("SQL failed")));
        assert_eq!(results[1].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_begin_failure_is_fatal() {
        let backend = RecordingBackend::new().fail_begin();
        let manager = transaction_manager(&backend);

        let err = WorkerPool::new(1)
            .run_all(vec![passing("a"), passing("b")], manager)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Lifecycle { worker: 0, .. }));
        assert_eq!(backend.count(|c| matches!(c, Call::Begin)), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Rollback)), 0);
    }

    #[tokio::test]
    async fn test_workers_run_in_parallel() {
        // Both cases must be inside `wait` at once for either to return
        let barrier = Arc::new(Barrier::new(2));
        let cases: Vec<Box<dyn TestCase>> = (0..2)
            .map(|i| {
                let barrier = barrier.clone();
                FnCase::new(&format!("case-{i}"), move |_| {
                    barrier.wait();
                    Outcome::Success
                })
                .boxed()
            })
            .collect();

        let pool = WorkerPool::new(2);
        let run = pool.run_all(cases, disabled());
        let results = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("workers did not run concurrently")
            .unwrap();

        assert!(results.iter().all(|r| r.is_success()));
        assert_ne!(results[0].worker, results[1].worker);
    }

    #[tokio::test]
    async fn test_more_workers_than_cases() {
        let results = WorkerPool::new(8)
            .run_all(vec![passing("only")], disabled())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_extra_args_reach_cases() {
        let cases = vec![FnCase::new("args", |ctx| {
            if ctx.extra_args == ["--seed", "7"] {
                Outcome::Success
            } else {
                Outcome::expectation(format!("got {:?}", ctx.extra_args))
            }
        })
        .boxed()];

        let results = WorkerPool::new(1)
            .with_extra_args(vec!["--seed".to_string(), "7".to_string()])
            .run_all(cases, disabled())
            .await
            .unwrap();
        assert!(results[0].is_success());
    }

    #[test]
    fn test_pool_minimum_one_worker() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
        assert_eq!(WorkerPool::default().workers(), 4);
    }
}
