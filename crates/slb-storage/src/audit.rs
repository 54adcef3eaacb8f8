//! Raw audit rows. Hashing and chain semantics live in `slb-audit`; the ledger
//! only stores what it is given, in append order.

use rusqlite::{OptionalExtension, Row, params};

use slb_core::Timestamp;

use crate::error::StorageResult;
use crate::ledger::{LedgerTx, ts_col};

/// One stored audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    /// Append position, assigned by the ledger. Zero before insertion.
    pub sequence: i64,
    /// Entry identifier.
    pub id: String,
    /// When the audited event happened.
    pub timestamp: Timestamp,
    /// Request the event concerns, if any.
    pub request_id: Option<String>,
    /// Session that caused the event, if any.
    pub actor: Option<String>,
    /// Serialized action payload.
    pub payload: String,
    /// Hex hash of the preceding entry.
    pub previous_hash: String,
    /// Hex hash of this entry.
    pub content_hash: String,
}

const AUDIT_COLUMNS: &str =
    "sequence, id, timestamp, request_id, actor, payload, previous_hash, content_hash";

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRow> {
    let ts: String = row.get(2)?;
    Ok(AuditRow {
        sequence: row.get(0)?,
        id: row.get(1)?,
        timestamp: ts_col(2, &ts)?,
        request_id: row.get(3)?,
        actor: row.get(4)?,
        payload: row.get(5)?,
        previous_hash: row.get(6)?,
        content_hash: row.get(7)?,
    })
}

impl LedgerTx<'_> {
    /// Append an audit row and return its sequence number.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub fn append_audit_row(&self, row: &AuditRow) -> StorageResult<i64> {
        self.tx.execute(
            "INSERT INTO audit_entries \
                 (id, timestamp, request_id, actor, payload, previous_hash, content_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.timestamp.to_rfc3339(),
                row.request_id,
                row.actor,
                row.payload,
                row.previous_hash,
                row.content_hash,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// The most recently appended row.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn last_audit_row(&self) -> StorageResult<Option<AuditRow>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries ORDER BY sequence DESC LIMIT 1"
        );
        Ok(self.tx.query_row(&sql, [], audit_from_row).optional()?)
    }

    /// All rows in append order, optionally only those for one request.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn audit_rows(&self, request_id: Option<&str>) -> StorageResult<Vec<AuditRow>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries \
             WHERE (?1 IS NULL OR request_id = ?1) ORDER BY sequence ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params![request_id], audit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows stamped before `cutoff`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn prune_audit_rows(&self, cutoff: Timestamp) -> StorageResult<usize> {
        Ok(self.tx.execute(
            "DELETE FROM audit_entries WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;

    fn row(id: &str, timestamp: Timestamp, request: Option<&str>) -> AuditRow {
        AuditRow {
            sequence: 0,
            id: id.into(),
            timestamp,
            request_id: request.map(str::to_owned),
            actor: None,
            payload: "{}".into(),
            previous_hash: "00".into(),
            content_hash: format!("h-{id}"),
        }
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let ledger = Ledger::open_in_memory().unwrap();
        let now = Timestamp::now();
        let (a, b) = ledger
            .write(|tx| {
                let a = tx.append_audit_row(&row("a", now, Some("r1")))?;
                let b = tx.append_audit_row(&row("b", now, None))?;
                Ok::<_, crate::StorageError>((a, b))
            })
            .unwrap();
        assert!(b > a);

        let last = ledger.read(|tx| tx.last_audit_row()).unwrap().unwrap();
        assert_eq!(last.id, "b");
        assert_eq!(ledger.read(|tx| tx.audit_rows(Some("r1"))).unwrap().len(), 1);
        assert_eq!(ledger.read(|tx| tx.audit_rows(None)).unwrap().len(), 2);
    }

    #[test]
    fn test_prune_by_timestamp() {
        let ledger = Ledger::open_in_memory().unwrap();
        let now = Timestamp::now();
        ledger
            .write(|tx| {
                tx.append_audit_row(&row("old", now.minus_secs(86_400 * 400), None))?;
                tx.append_audit_row(&row("new", now, None))
            })
            .unwrap();
        let removed = ledger
            .write(|tx| tx.prune_audit_rows(now.minus_secs(86_400 * 365)))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.read(|tx| tx.audit_rows(None)).unwrap()[0].id, "new");
    }
}
