//! PostgreSQL backend driven through the `psql` client
//!
//! Whole-database operations run one `psql -c` invocation each. Worker
//! sessions keep a single `psql` process open and feed it statements over
//! stdin, so a transaction begun by one statement is still open for the next.
//!
//! A session never stops on a failed statement. After each statement it
//! echoes an error marker when `:ERROR` is set, then the completion sentinel;
//! stderr is drained on its own thread and only its tail is kept.

use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

use super::{DatabaseBackend, DatabaseError, DatabaseSession};
use crate::models::ConnectionDescriptor;

/// Line echoed after each statement to mark its completion
const SENTINEL: &str = "__shardrun_done__";

/// Prefix of the line echoed when the statement failed
const ERROR_MARKER: &str = "__shardrun_error__";

/// Bytes of session stderr kept for error messages
const STDERR_TAIL: usize = 4096;

const TRUNCATE_PUBLIC_TABLES: &str = "DO $$ DECLARE r record; BEGIN \
     FOR r IN SELECT tablename FROM pg_tables WHERE schemaname = 'public' LOOP \
     EXECUTE 'TRUNCATE TABLE ' || quote_ident(r.tablename) || ' CASCADE'; \
     END LOOP; END $$";

/// `psql`-backed [`DatabaseBackend`]
#[derive(Clone, Debug)]
pub struct PsqlBackend {
    binary: PathBuf,
}

impl PsqlBackend {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("psql"),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self, descriptor: &ConnectionDescriptor, database: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["-X", "-q"])
            .envs(connection_env(descriptor, database));
        command
    }

    fn run_sql(
        &self,
        label: &'static str,
        descriptor: &ConnectionDescriptor,
        database: &str,
        sql: &str,
    ) -> Result<(), DatabaseError> {
        debug!("psql [{}] {}", database, sql);

        let output = self
            .command(descriptor, database)
            .args(["-v", "ON_ERROR_STOP=1", "-c", sql])
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DatabaseError::Command {
                command: label,
                target: descriptor.database.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for PsqlBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBackend for PsqlBackend {
    fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.run_sql("SELECT 1", descriptor, &descriptor.database, "SELECT 1")
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))
    }

    fn create_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        let sql = format!("CREATE DATABASE {}", quote_ident(&descriptor.database));
        self.run_sql(
            "CREATE DATABASE",
            descriptor,
            &descriptor.maintenance_database,
            &sql,
        )
    }

    fn drop_database(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&descriptor.database));
        self.run_sql(
            "DROP DATABASE",
            descriptor,
            &descriptor.maintenance_database,
            &sql,
        )
    }

    fn truncate_all(&self, descriptor: &ConnectionDescriptor) -> Result<(), DatabaseError> {
        self.run_sql(
            "TRUNCATE",
            descriptor,
            &descriptor.database,
            TRUNCATE_PUBLIC_TABLES,
        )
    }

    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError> {
        let mut child = self
            .command(descriptor, &descriptor.database)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DatabaseError::Session("psql pipes unavailable".to_string()));
        };

        let tail = Arc::new(Mutex::new(Vec::new()));
        let drain = spawn_stderr_drain(stderr, tail.clone());

        let mut session = PsqlSession {
            database: descriptor.database.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: tail,
            drain: Some(drain),
        };
        session.execute("SET client_min_messages TO warning")?;
        Ok(Box::new(session))
    }
}

/// One long-lived `psql` process
pub struct PsqlSession {
    database: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Tail of everything the process wrote to stderr
    stderr: Arc<Mutex<Vec<u8>>>,
    drain: Option<JoinHandle<()>>,
}

impl PsqlSession {
    fn send(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let statement = sql.trim().trim_end_matches(';');
        let script = format!(
            "{statement};\n\\if :ERROR\n\\echo {ERROR_MARKER} :LAST_ERROR_MESSAGE\n\\endif\n\\echo {SENTINEL}\n"
        );
        let written = self
            .stdin
            .write_all(script.as_bytes())
            .and_then(|_| self.stdin.flush());
        if written.is_err() {
            return Err(self.closed());
        }

        let mut failure = None;
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(self.closed());
            }
            let text = line.trim_end();
            if text == SENTINEL {
                break;
            }
            if let Some(message) = text.strip_prefix(ERROR_MARKER) {
                failure = Some(message.trim().to_string());
            }
        }

        match failure {
            None => Ok(()),
            Some(message) => Err(DatabaseError::Command {
                command: "SQL",
                target: self.database.clone(),
                message,
            }),
        }
    }

    /// Error for a session whose process stopped, with the tail of its stderr
    fn closed(&mut self) -> DatabaseError {
        let status = self.stop();
        let tail = String::from_utf8_lossy(&self.stderr.lock()).trim().to_string();
        match (tail.is_empty(), status) {
            (false, _) => DatabaseError::Session(tail),
            (true, Some(status)) => DatabaseError::Session(format!("psql exited unexpectedly ({status})")),
            (true, None) => DatabaseError::Session("psql exited unexpectedly".to_string()),
        }
    }

    /// Kill the process and wait for the stderr drain to finish
    fn stop(&mut self) -> Option<std::process::ExitStatus> {
        let _ = self.child.kill();
        let status = self.child.wait().ok();
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
        status
    }
}

impl DatabaseSession for PsqlSession {
    fn begin(&mut self) -> Result<(), DatabaseError> {
        self.send("BEGIN")
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.send("ROLLBACK")
    }

    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.send(sql)
    }
}

impl Drop for PsqlSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read `pipe` until EOF, keeping the last [`STDERR_TAIL`] bytes in `tail`
fn spawn_stderr_drain(mut pipe: ChildStderr, tail: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            let n = match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            let mut tail = tail.lock();
            tail.extend_from_slice(&buf[..n]);
            let excess = tail.len().saturating_sub(STDERR_TAIL);
            tail.drain(..excess);
        }
    })
}

/// libpq environment for reaching `database` with `descriptor`'s settings
fn connection_env(descriptor: &ConnectionDescriptor, database: &str) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("PGHOST", descriptor.host.clone()),
        ("PGPORT", descriptor.port.to_string()),
        ("PGDATABASE", database.to_string()),
    ];
    if let Some(user) = &descriptor.username {
        env.push(("PGUSER", user.clone()));
    }
    if let Some(password) = &descriptor.password {
        env.push(("PGPASSWORD", password.clone()));
    }
    env
}

/// Quote an SQL identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
