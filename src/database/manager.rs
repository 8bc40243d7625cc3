//! Database strategy manager
//!
//! Owns the lifecycle of the shared database for one run: setup before
//! dispatch, a begin/rollback pair around every case on each worker's own
//! connection, and teardown after dispatch.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DatabaseBackend, DatabaseError, DatabaseSession};
use crate::models::{ConnectionDescriptor, DatabaseStrategy};

struct Connected {
    backend: Arc<dyn DatabaseBackend>,
    template: ConnectionDescriptor,
}

/// Drives the selected [`DatabaseStrategy`] against a backend
///
/// A manager whose backend could not be reached at construction is
/// disabled: every operation then returns immediately without touching
/// the backend.
pub struct DatabaseManager {
    strategy: DatabaseStrategy,
    databases: Vec<String>,
    connected: Option<Connected>,
    set_up: AtomicBool,
    /// Databases created by `setup`, keyed by their index in `databases`
    created: Mutex<BTreeMap<usize, ConnectionDescriptor>>,
}

impl DatabaseManager {
    /// Create a manager, probing the template database once
    pub fn new(
        strategy: DatabaseStrategy,
        databases: Vec<String>,
        backend: Arc<dyn DatabaseBackend>,
        template: ConnectionDescriptor,
    ) -> Self {
        let connected = match backend.probe(&template) {
            Ok(()) => {
                debug!("Database reachable at {}", template);
                Some(Connected { backend, template })
            }
            Err(e) => {
                warn!("No database detected. Skipping database setup ({e})");
                None
            }
        };

        Self {
            strategy,
            databases,
            connected,
            set_up: AtomicBool::new(false),
            created: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a manager with no database behind it
    pub fn disabled(strategy: DatabaseStrategy) -> Self {
        Self {
            strategy,
            databases: Vec::new(),
            connected: None,
            set_up: AtomicBool::new(false),
            created: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn strategy(&self) -> DatabaseStrategy {
        self.strategy
    }

    pub fn is_enabled(&self) -> bool {
        self.connected.is_some()
    }

    /// Prepare the database for the run
    ///
    /// Succeeds at most once per manager; calls after a success are no-ops,
    /// calls after a failure try again. Under the separate strategy a
    /// database that cannot be created is logged and skipped, and will not
    /// be dropped at teardown.
    pub fn setup(&self) -> Result<(), DatabaseError> {
        let Some(connected) = &self.connected else {
            return Ok(());
        };
        if self.set_up.load(Ordering::SeqCst) {
            debug!("Database strategy already set up");
            return Ok(());
        }

        info!("Setting up database strategy: {}", self.strategy);

        match self.strategy {
            DatabaseStrategy::Transaction => connected.backend.truncate_all(&connected.template)?,
            DatabaseStrategy::Separate => self.create_separate_databases(connected),
        }
        self.set_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_separate_databases(&self, connected: &Connected) {
        let mut created = self.created.lock();

        for (index, name) in self.databases.iter().enumerate() {
            let descriptor = connected.template.for_database(name);
            match connected.backend.create_database(&descriptor) {
                Ok(()) => {
                    info!("Database created: {}", name);
                    created.insert(index, descriptor);
                }
                Err(e) => {
                    warn!("Failed to create database: {}, might already exist ({e})", name);
                }
            }
        }
    }

    /// Open the per-worker scope used around each case
    ///
    /// Under the transaction strategy this opens a connection owned by the
    /// worker, so rollbacks never reach another worker's cases.
    pub fn worker_scope(&self, worker: usize) -> Result<UnitScope, DatabaseError> {
        let Some(connected) = &self.connected else {
            return Ok(UnitScope::inert(worker));
        };

        match self.strategy {
            DatabaseStrategy::Transaction => {
                let session = connected.backend.connect(&connected.template)?;
                debug!("Worker {} connected to {}", worker, connected.template);
                Ok(UnitScope {
                    worker,
                    database: Some(connected.template.clone()),
                    session: Some(session),
                })
            }
            DatabaseStrategy::Separate => {
                let database = match self.databases.len() {
                    0 => connected.template.clone(),
                    n => connected.template.for_database(&self.databases[worker % n]),
                };
                Ok(UnitScope {
                    worker,
                    database: Some(database),
                    session: None,
                })
            }
        }
    }

    /// Drop every database created by `setup`
    ///
    /// All drops are attempted; failures are collected into a single
    /// [`DatabaseError::Teardown`].
    pub fn teardown(&self) -> Result<(), DatabaseError> {
        let Some(connected) = &self.connected else {
            return Ok(());
        };
        if self.strategy != DatabaseStrategy::Separate {
            return Ok(());
        }

        let created = std::mem::take(&mut *self.created.lock());
        if created.is_empty() {
            return Ok(());
        }

        info!("Tearing down {} separate database(s)", created.len());

        let mut failures = Vec::new();
        for descriptor in created.values() {
            match connected.backend.drop_database(descriptor) {
                Ok(()) => info!("Database dropped: {}", descriptor.database),
                Err(e) => {
                    warn!("Failed to drop database {}: {e}", descriptor.database);
                    failures.push(format!("{}: {e}", descriptor.database));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DatabaseError::Teardown { failures })
        }
    }

    /// Databases created by `setup` and not yet dropped
    pub fn created_databases(&self) -> Vec<ConnectionDescriptor> {
        self.created.lock().values().cloned().collect()
    }
}

/// Per-worker database state
pub struct UnitScope {
    worker: usize,
    database: Option<ConnectionDescriptor>,
    session: Option<Box<dyn DatabaseSession>>,
}

impl UnitScope {
    fn inert(worker: usize) -> Self {
        Self {
            worker,
            database: None,
            session: None,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Database the worker's cases should use
    pub fn database(&self) -> Option<&ConnectionDescriptor> {
        self.database.as_ref()
    }

    /// Open a transactional checkpoint before a case
    pub fn before_unit(&mut self) -> Result<(), DatabaseError> {
        match self.session.as_mut() {
            Some(session) => session.begin(),
            None => Ok(()),
        }
    }

    /// Roll back to the checkpoint opened by `before_unit`
    pub fn after_unit(&mut self) -> Result<(), DatabaseError> {
        match self.session.as_mut() {
            Some(session) => session.rollback(),
            None => Ok(()),
        }
    }

    /// Database and session handed to a case
    pub fn parts(&mut self) -> (Option<&ConnectionDescriptor>, Option<&mut dyn DatabaseSession>) {
        let session: Option<&mut dyn DatabaseSession> = match self.session.as_mut() {
            Some(session) => Some(session.as_mut()),
            None => None,
        };
        (self.database.as_ref(), session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::{Call, RecordingBackend};

    fn manager(
        strategy: DatabaseStrategy,
        databases: &[&str],
        backend: &RecordingBackend,
    ) -> DatabaseManager {
        DatabaseManager::new(
            strategy,
            databases.iter().map(|s| s.to_string()).collect(),
            Arc::new(backend.clone()),
            ConnectionDescriptor::new("app_test"),
        )
    }

    #[test]
    fn test_transaction_setup_truncates_once() {
        let backend = RecordingBackend::new();
        let manager = manager(DatabaseStrategy::Transaction, &[], &backend);

        manager.setup().unwrap();
        manager.setup().unwrap();

        assert!(manager.is_enabled());
        assert_eq!(backend.count(|c| matches!(c, Call::Truncate(_))), 1);
    }

    #[test]
    fn test_failed_setup_is_retried() {
        let backend = RecordingBackend::new().fail_truncate();
        let manager = manager(DatabaseStrategy::Transaction, &[], &backend);

        assert!(manager.setup().is_err());
        assert!(manager.setup().is_err());
        assert_eq!(backend.count(|c| matches!(c, Call::Truncate(_))), 2);
    }

    #[test]
    fn test_transaction_scope_begins_and_rolls_back() {
        let backend = RecordingBackend::new();
        let manager = manager(DatabaseStrategy::Transaction, &[], &backend);
        manager.setup().unwrap();

        let mut scope = manager.worker_scope(0).unwrap();
        scope.before_unit().unwrap();
        scope.after_unit().unwrap();
        scope.before_unit().unwrap();
        scope.after_unit().unwrap();

        assert_eq!(backend.count(|c| matches!(c, Call::Connect(_))), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Begin)), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::Rollback)), 2);
        assert_eq!(scope.database().map(|d| d.database.as_str()), Some("app_test"));
    }

    #[test]
    fn test_separate_creates_and_drops_all() {
        let backend = RecordingBackend::new();
        let manager = manager(DatabaseStrategy::Separate, &["db_a", "db_b"], &backend);

        manager.setup().unwrap();
        assert_eq!(manager.created_databases().len(), 2);

        manager.teardown().unwrap();
        assert_eq!(backend.created(), vec!["db_a", "db_b"]);
        assert_eq!(backend.dropped(), vec!["db_a", "db_b"]);
        assert!(manager.created_databases().is_empty());
    }

    #[test]
    fn test_separate_drops_only_created() {
        let backend = RecordingBackend::new().fail_create("db_a");
        let manager = manager(DatabaseStrategy::Separate, &["db_a", "db_b"], &backend);

        manager.setup().unwrap();
        manager.teardown().unwrap();

        assert_eq!(backend.count(|c| matches!(c, Call::Create(_))), 2);
        assert_eq!(backend.dropped(), vec!["db_b"]);
    }

    #[test]
    fn test_teardown_continues_after_drop_failure() {
        let backend = RecordingBackend::new().fail_drop("db_a");
        let manager = manager(DatabaseStrategy::Separate, &["db_a", "db_b"], &backend);

        manager.setup().unwrap();
        let err = manager.teardown().unwrap_err();

        assert!(matches!(err, DatabaseError::Teardown { ref failures } if failures.len() == 1));
        assert_eq!(backend.count(|c| matches!(c, Call::Drop(_))), 2);
    }

    #[test]
    fn test_separate_worker_database_assignment() {
        let backend = RecordingBackend::new();
        let manager = manager(DatabaseStrategy::Separate, &["db_a", "db_b"], &backend);

        let names: Vec<String> = (0..3)
            .map(|w| manager.worker_scope(w).unwrap().database().unwrap().database.clone())
            .collect();
        assert_eq!(names, vec!["db_a", "db_b", "db_a"]);
        assert_eq!(backend.count(|c| matches!(c, Call::Connect(_))), 0);
    }

    #[test]
    fn test_unreachable_database_is_inert() {
        let backend = RecordingBackend::unreachable();
        let manager = manager(DatabaseStrategy::Separate, &["db_a"], &backend);

        assert!(!manager.is_enabled());
        manager.setup().unwrap();
        let mut scope = manager.worker_scope(0).unwrap();
        scope.before_unit().unwrap();
        scope.after_unit().unwrap();
        manager.teardown().unwrap();

        // Only the construction probe reached the backend
        assert_eq!(backend.calls(), vec![Call::Probe]);
        assert!(scope.database().is_none());
    }
}
