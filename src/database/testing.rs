//! In-memory database backend that records every call, and a stand-in
//! `psql` script for exercising the real session protocol

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{DatabaseBackend, DatabaseError, DatabaseSession};
use crate::models::ConnectionDescriptor;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Probe,
    Create(String),
    Drop(String),
    Truncate(String),
    Connect(String),
    Begin,
    Rollback,
    Execute(String),
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    unreachable: bool,
    fail_create: HashSet<String>,
    fail_drop: HashSet<String>,
    fail_truncate: bool,
    fail_begin: bool,
    fail_rollback: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn fail_create(mut self, name: &str) -> Self {
        self.fail_create.insert(name.to_string());
        self
    }

    pub fn fail_drop(mut self, name: &str) -> Self {
        self.fail_drop.insert(name.to_string());
        self
    }

    pub fn fail_truncate(mut self) -> Self {
        self.fail_truncate = true;
        self
    }

    pub fn fail_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Names passed to `create_database`, in call order
    pub fn created(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Create(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names passed to `drop_database`, in call order
    pub fn dropped(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Drop(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl DatabaseBackend for RecordingBackend {
    fn probe(&self, _descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.record(Call::Probe);
        if self.unreachable {
            return Err(DatabaseError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.record(Call::Create(descriptor.database.clone()));
        if self.fail_create.contains(&descriptor.database) {
            return Err(DatabaseError::Command {
                command: "CREATE DATABASE",
                target: descriptor.database.clone(),
                message: "already exists".to_string(),
            });
        }
        Ok(())
    }

    fn drop_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.record(Call::Drop(descriptor.database.clone()));
        if self.fail_drop.contains(&descriptor.database) {
            return Err(DatabaseError::Command {
                command: "DROP DATABASE",
                target: descriptor.database.clone(),
                message: "in use".to_string(),
            });
        }
        Ok(())
    }

    fn truncate_all(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.record(Call::Truncate(descriptor.database.clone()));
        if self.fail_truncate {
            return Err(DatabaseError::Command {
                command: "TRUNCATE",
                target: descriptor.database.clone(),
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError> {
        self.record(Call::Connect(descriptor.database.clone()));
        Ok(Box::new(RecordingSession {
            calls: self.calls.clone(),
            fail_begin: self.fail_begin,
            fail_rollback: self.fail_rollback,
        }))
    }
}

struct RecordingSession {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_begin: bool,
    fail_rollback: bool,
}

impl DatabaseSession for RecordingSession {
    fn begin(&mut self) -> Result<(), DatabaseError> {
        self.calls.lock().push(Call::Begin);
        if self.fail_begin {
            return Err(DatabaseError::Session("begin refused".to_string()));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.calls.lock().push(Call::Rollback);
        if self.fail_rollback {
            return Err(DatabaseError::Session("server closed the connection".to_string()));
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.calls.lock().push(Call::Execute(sql.to_string()));
        Ok(())
    }
}

/// Shell script that speaks enough of the `psql` protocol for session tests
///
/// Statements containing `FAIL` fail without ending the process, `NOISE`
/// writes about 120 KB to stderr, and `DIE` makes the process exit.
const FAKE_PSQL: &str = r#"#!/bin/sh
failed=
message=
statement() {
  case "$1" in
    *DIE*) echo "FATAL:  terminating connection due to administrator command" >&2; exit 3 ;;
    *NOISE*) head -c 122880 /dev/zero | tr '\0' 'w' >&2; echo >&2; failed= ;;
    *FAIL*) message='column "fail" does not exist'; echo "ERROR:  $message" >&2; failed=1 ;;
    *) failed= ;;
  esac
}
while [ $# -gt 0 ]; do
  if [ "$1" = "-c" ]; then
    statement "$2"
    [ -z "$failed" ] || exit 1
    exit 0
  fi
  shift
done
while IFS= read -r line; do
  case "$line" in
    '\if :ERROR'|'\endif') ;;
    '\echo __shardrun_error__ :LAST_ERROR_MESSAGE') [ -z "$failed" ] || echo "__shardrun_error__ $message" ;;
    '\echo '*) echo "${line#* }" ;;
    *) statement "$line" ;;
  esac
done
"#;

/// Write the stand-in `psql` into `dir` and return its path
pub fn fake_psql(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("psql");
    std::fs::write(&path, FAKE_PSQL).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
