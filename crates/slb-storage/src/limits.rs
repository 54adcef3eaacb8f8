//! Rate-limit bookkeeping: one admission row per admitted request, plus the
//! last manual reset per session.

use rusqlite::{OptionalExtension, params};

use slb_core::{SessionId, Timestamp};

use crate::error::StorageResult;
use crate::ledger::{LedgerTx, ts_col};

impl LedgerTx<'_> {
    /// Record that `session` was admitted at `at`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub fn record_admission(&self, session: &SessionId, at: Timestamp) -> StorageResult<()> {
        self.tx.execute(
            "INSERT INTO admissions (session_id, admitted_at) VALUES (?1, ?2)",
            params![session.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Admissions for `session` strictly after `since`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn admissions_since(&self, session: &SessionId, since: Timestamp) -> StorageResult<u32> {
        let n: u32 = self.tx.query_row(
            "SELECT COUNT(*) FROM admissions WHERE session_id = ?1 AND admitted_at > ?2",
            params![session.to_string(), since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// The earliest admission for `session` strictly after `since`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails or the row is malformed.
    pub fn oldest_admission_since(
        &self,
        session: &SessionId,
        since: Timestamp,
    ) -> StorageResult<Option<Timestamp>> {
        let raw: Option<String> = self.tx.query_row(
            "SELECT MIN(admitted_at) FROM admissions WHERE session_id = ?1 AND admitted_at > ?2",
            params![session.to_string(), since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(raw.map(|r| ts_col(0, &r)).transpose()?)
    }

    /// Remember a manual limit reset for `session`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the upsert fails.
    pub fn reset_rate_limits(&self, session: &SessionId, at: Timestamp) -> StorageResult<()> {
        self.tx.execute(
            "INSERT INTO rate_limit_resets (session_id, reset_at) VALUES (?1, ?2) \
             ON CONFLICT(session_id) DO UPDATE SET reset_at = excluded.reset_at",
            params![session.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// The last manual reset for `session`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails or the row is malformed.
    pub fn last_rate_limit_reset(&self, session: &SessionId) -> StorageResult<Option<Timestamp>> {
        Ok(self
            .tx
            .query_row(
                "SELECT reset_at FROM rate_limit_resets WHERE session_id = ?1",
                params![session.to_string()],
                |row| {
                    let raw: String = row.get(0)?;
                    ts_col(0, &raw)
                },
            )
            .optional()?)
    }

    /// Drop admission rows older than `before`; they no longer affect any window.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn prune_admissions(&self, before: Timestamp) -> StorageResult<usize> {
        Ok(self.tx.execute(
            "DELETE FROM admissions WHERE admitted_at < ?1",
            params![before.to_rfc3339()],
        )?)
    }
}
