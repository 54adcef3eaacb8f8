//! Ledger handle, schema and transaction wrapper.
//!
//! The ledger is a single SQLite file per project, opened in WAL mode so
//! several CLI processes can read while one writes. Every mutation runs inside
//! a `BEGIN IMMEDIATE` transaction, which takes the write lock up front and
//! serializes read-check-write sequences (rate limiting, quorum recount, the
//! executor claim) across processes.

use rusqlite::{Connection, OpenFlags, TransactionBehavior, types::Type};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use slb_core::Timestamp;

use crate::error::{StorageError, StorageResult};

/// How long a writer waits for another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Current schema revision, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    agent_name    TEXT NOT NULL,
    program       TEXT NOT NULL,
    model         TEXT NOT NULL,
    project_path  TEXT NOT NULL,
    human         INTEGER NOT NULL DEFAULT 0,
    session_key   TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    last_active   TEXT NOT NULL,
    ended_at      TEXT
);

CREATE TABLE IF NOT EXISTS requests (
    id                      TEXT PRIMARY KEY,
    command                 TEXT NOT NULL,
    display_command         TEXT NOT NULL,
    cwd                     TEXT NOT NULL,
    shell                   INTEGER NOT NULL,
    risk_tier               TEXT NOT NULL,
    min_approvals           INTEGER NOT NULL,
    require_different_model INTEGER NOT NULL,
    conflict_resolution     TEXT NOT NULL,
    status                  TEXT NOT NULL,
    requester_session_id    TEXT NOT NULL REFERENCES sessions(id),
    requester_agent         TEXT NOT NULL,
    requester_model         TEXT NOT NULL,
    justification           TEXT NOT NULL,
    project_path            TEXT NOT NULL,
    dry_run_command         TEXT,
    created_at              TEXT NOT NULL,
    request_deadline        TEXT NOT NULL,
    approval_ttl_deadline   TEXT,
    escalated               INTEGER NOT NULL DEFAULT 0,
    awaiting_tie_break      INTEGER NOT NULL DEFAULT 0,
    resolved_at             TEXT,
    exit_code               INTEGER,
    duration_ms             INTEGER,
    log_path                TEXT,
    rollback_path           TEXT,
    executed_at             TEXT,
    reviews_reset_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_session ON requests(requester_session_id, status);

CREATE TABLE IF NOT EXISTS reviews (
    id                  TEXT PRIMARY KEY,
    request_id          TEXT NOT NULL REFERENCES requests(id),
    reviewer_session_id TEXT NOT NULL,
    reviewer_agent      TEXT NOT NULL,
    reviewer_model      TEXT NOT NULL,
    decision            TEXT NOT NULL,
    comments            TEXT NOT NULL,
    signature           TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reviews_request ON reviews(request_id, reviewer_session_id);

CREATE TABLE IF NOT EXISTS admissions (
    session_id  TEXT NOT NULL,
    admitted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_admissions_session ON admissions(session_id, admitted_at);

CREATE TABLE IF NOT EXISTS rate_limit_resets (
    session_id TEXT PRIMARY KEY,
    reset_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_entries (
    sequence      INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    timestamp     TEXT NOT NULL,
    request_id    TEXT,
    actor         TEXT,
    payload       TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    content_hash  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
";

/// Handle to a project's SQLite ledger.
///
/// Cloning is cheap; clones share one connection guarded by a mutex. Other
/// processes coordinate through SQLite's own file locking.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the file cannot be opened or
    /// the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StorageError::Connection(format!("{}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the schema cannot be applied.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StorageResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if version > SCHEMA_VERSION {
            return Err(StorageError::Connection(format!(
                "ledger schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::Connection(format!("schema: {e}")))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        debug!(path = ?path, "Ledger opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path of the backing file, `None` for in-memory ledgers.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside an immediate (write-locked) transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a storage error converted into `E` if
    /// the transaction cannot begin or commit.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&LedgerTx<'_>) -> Result<T, E>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a deferred transaction, for consistent multi-query reads.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a storage error converted into `E`.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&LedgerTx<'_>) -> Result<T, E>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn run<T, E, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&LedgerTx<'_>) -> Result<T, E>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("ledger lock poisoned: {e}")))?;
        let tx = guard
            .transaction_with_behavior(behavior)
            .map_err(StorageError::from)?;
        let ledger_tx = LedgerTx { tx };
        let value = f(&ledger_tx)?;
        ledger_tx.tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }
}

/// An open ledger transaction. All typed queries hang off this.
pub struct LedgerTx<'c> {
    pub(crate) tx: rusqlite::Transaction<'c>,
}

impl std::fmt::Debug for LedgerTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTx").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Parse a text column through `FromStr`, surfacing failures as conversion errors.
pub(crate) fn parse_col<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_col(idx: usize, raw: &str) -> rusqlite::Result<Timestamp> {
    Timestamp::parse_rfc3339(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_col(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Timestamp>> {
    raw.map(|s| ts_col(idx, &s)).transpose()
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/.slb/state.db");
        let ledger = Ledger::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ledger.path(), Some(path.as_path()));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.db");
        drop(Ledger::open(&path).unwrap());
        Ledger::open(&path).unwrap();
    }

    #[test]
    fn test_failed_closure_rolls_back() {
        let ledger = Ledger::open_in_memory().unwrap();
        let res: StorageResult<()> = ledger.write(|tx| {
            tx.tx
                .execute("INSERT INTO rate_limit_resets VALUES ('s', 't')", [])
                .map_err(StorageError::from)?;
            Err(StorageError::Internal("boom".into()))
        });
        assert!(res.is_err());

        let count: i64 = ledger
            .read(|tx| {
                tx.tx
                    .query_row("SELECT COUNT(*) FROM rate_limit_resets", [], |r| r.get(0))
                    .map_err(StorageError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        let err = Ledger::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
    }
}
