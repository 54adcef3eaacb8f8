//! Audit log storage trait, the ledger-backed implementation and an
//! in-memory one for tests.

use std::sync::Mutex;

use slb_core::{RequestId, SessionId, Timestamp};
use slb_crypto::ContentHash;
use slb_storage::{AuditRow, LedgerTx};

use crate::entry::{AuditEntry, AuditEntryId};
use crate::error::{AuditError, AuditResult};

/// Storage backend for the audit chain.
///
/// Implementations append in order and hand entries back in that order.
pub trait AuditStorage {
    /// Store an entry and return its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    fn store(&self, entry: &AuditEntry) -> AuditResult<i64>;

    /// Hash of the most recent entry, `None` for an empty log.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    fn chain_head(&self) -> AuditResult<Option<ContentHash>>;

    /// All entries in append order, optionally only those for one request.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval or decoding fails.
    fn entries(&self, request_id: Option<&RequestId>) -> AuditResult<Vec<AuditEntry>>;

    /// Remove entries stamped before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn prune_before(&self, cutoff: Timestamp) -> AuditResult<usize>;
}

impl<T: AuditStorage + ?Sized> AuditStorage for &T {
    fn store(&self, entry: &AuditEntry) -> AuditResult<i64> {
        (**self).store(entry)
    }

    fn chain_head(&self) -> AuditResult<Option<ContentHash>> {
        (**self).chain_head()
    }

    fn entries(&self, request_id: Option<&RequestId>) -> AuditResult<Vec<AuditEntry>> {
        (**self).entries(request_id)
    }

    fn prune_before(&self, cutoff: Timestamp) -> AuditResult<usize> {
        (**self).prune_before(cutoff)
    }
}

// ---------------------------------------------------------------------------
// Ledger-backed storage
// ---------------------------------------------------------------------------

fn to_row(entry: &AuditEntry) -> AuditResult<AuditRow> {
    Ok(AuditRow {
        sequence: entry.sequence,
        id: entry.id.0.to_string(),
        timestamp: entry.timestamp,
        request_id: entry.request_id.map(|r| r.to_string()),
        actor: entry.actor.map(|s| s.to_string()),
        payload: serde_json::to_string(&entry.action)?,
        previous_hash: entry.previous_hash.to_hex(),
        content_hash: entry.content_hash.to_hex(),
    })
}

fn from_row(row: AuditRow) -> AuditResult<AuditEntry> {
    let corrupt = |reason: String| AuditError::CorruptEntry {
        entry_id: row.id.clone(),
        reason,
    };
    let id = row
        .id
        .parse()
        .map(AuditEntryId)
        .map_err(|e| corrupt(format!("id: {e}")))?;
    let request_id = row
        .request_id
        .as_deref()
        .map(str::parse::<RequestId>)
        .transpose()
        .map_err(|e| corrupt(format!("request_id: {e}")))?;
    let actor = row
        .actor
        .as_deref()
        .map(str::parse::<SessionId>)
        .transpose()
        .map_err(|e| corrupt(format!("actor: {e}")))?;
    let action = serde_json::from_str(&row.payload).map_err(|e| corrupt(format!("payload: {e}")))?;
    let previous_hash = ContentHash::from_hex(&row.previous_hash)
        .map_err(|e| corrupt(format!("previous_hash: {e}")))?;
    let content_hash = ContentHash::from_hex(&row.content_hash)
        .map_err(|e| corrupt(format!("content_hash: {e}")))?;
    Ok(AuditEntry {
        id,
        sequence: row.sequence,
        timestamp: row.timestamp,
        request_id,
        actor,
        action,
        previous_hash,
        content_hash,
    })
}

impl AuditStorage for LedgerTx<'_> {
    fn store(&self, entry: &AuditEntry) -> AuditResult<i64> {
        Ok(self.append_audit_row(&to_row(entry)?)?)
    }

    fn chain_head(&self) -> AuditResult<Option<ContentHash>> {
        self.last_audit_row()?
            .map(|row| {
                ContentHash::from_hex(&row.content_hash).map_err(|e| AuditError::CorruptEntry {
                    entry_id: row.id.clone(),
                    reason: format!("content_hash: {e}"),
                })
            })
            .transpose()
    }

    fn entries(&self, request_id: Option<&RequestId>) -> AuditResult<Vec<AuditEntry>> {
        let filter = request_id.map(ToString::to_string);
        self.audit_rows(filter.as_deref())?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn prune_before(&self, cutoff: Timestamp) -> AuditResult<usize> {
        Ok(self.prune_audit_rows(cutoff)?)
    }
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

/// Volatile audit storage.
#[derive(Debug, Default)]
pub struct MemoryAuditStorage {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AuditResult<std::sync::MutexGuard<'_, Vec<AuditEntry>>> {
        self.entries
            .lock()
            .map_err(|e| AuditError::StorageError(format!("lock poisoned: {e}")))
    }
}

impl AuditStorage for MemoryAuditStorage {
    fn store(&self, entry: &AuditEntry) -> AuditResult<i64> {
        let mut entries = self.lock()?;
        let sequence = entries.last().map_or(1, |e| e.sequence.saturating_add(1));
        let mut stored = entry.clone();
        stored.sequence = sequence;
        entries.push(stored);
        Ok(sequence)
    }

    fn chain_head(&self) -> AuditResult<Option<ContentHash>> {
        Ok(self.lock()?.last().map(|e| e.content_hash))
    }

    fn entries(&self, request_id: Option<&RequestId>) -> AuditResult<Vec<AuditEntry>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|e| request_id.is_none_or(|r| e.request_id.as_ref() == Some(r)))
            .cloned()
            .collect())
    }

    fn prune_before(&self, cutoff: Timestamp) -> AuditResult<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok(before.saturating_sub(entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use slb_storage::Ledger;

    #[test]
    fn test_ledger_storage_roundtrip() {
        let ledger = Ledger::open_in_memory().unwrap();
        let request = RequestId::new();
        let entry = AuditEntry::create(
            Some(request),
            Some(SessionId::new()),
            AuditAction::ApprovalExpired,
            ContentHash::zero(),
            Timestamp::now(),
        );
        let seq = ledger.write(|tx| tx.store(&entry)).unwrap();

        let loaded = ledger.read(|tx| tx.entries(Some(&request))).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sequence, seq);
        assert_eq!(loaded[0].content_hash, entry.content_hash);
        assert!(loaded[0].is_intact());
        assert_eq!(
            ledger.read(|tx| tx.chain_head()).unwrap(),
            Some(entry.content_hash)
        );
    }

    #[test]
    fn test_memory_storage_assigns_sequence() {
        let store = MemoryAuditStorage::new();
        let now = Timestamp::now();
        let a = AuditEntry::create(None, None, AuditAction::RateLimitsReset, ContentHash::zero(), now);
        let b = AuditEntry::create(None, None, AuditAction::RateLimitsReset, a.content_hash, now);
        assert_eq!(store.store(&a).unwrap(), 1);
        assert_eq!(store.store(&b).unwrap(), 2);
        assert_eq!(store.chain_head().unwrap(), Some(b.content_hash));
    }
}
