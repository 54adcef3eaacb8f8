//! The audit log: appending chained entries, verifying the chain, pruning.

use serde::Serialize;
use tracing::{debug, warn};

use slb_core::{RequestId, SessionId, Timestamp};
use slb_crypto::ContentHash;

use crate::entry::{AuditAction, AuditEntry, AuditEntryId};
use crate::error::AuditResult;
use crate::storage::AuditStorage;

const SECS_PER_DAY: u64 = 86_400;

/// Chain-linked audit log over some [`AuditStorage`].
///
/// Usually built per ledger transaction, so the audit entry commits or rolls
/// back together with the state change it records.
#[derive(Debug)]
pub struct AuditLog<S> {
    storage: S,
}

impl<S: AuditStorage> AuditLog<S> {
    /// Wrap a storage backend.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Append an action, linking it to the current chain head.
    ///
    /// # Errors
    ///
    /// Returns an error if the head cannot be read or the entry cannot be stored.
    pub fn append(
        &self,
        request_id: Option<RequestId>,
        actor: Option<SessionId>,
        action: AuditAction,
        at: Timestamp,
    ) -> AuditResult<AuditEntry> {
        let previous = self.storage.chain_head()?.unwrap_or_else(ContentHash::zero);
        let mut entry = AuditEntry::create(request_id, actor, action, previous, at);
        entry.sequence = self.storage.store(&entry)?;
        debug!(
            sequence = entry.sequence,
            request_id = ?request_id,
            action = %entry.action.description(),
            "Audit entry appended"
        );
        Ok(entry)
    }

    /// Entries for one request (or all), in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub fn entries(&self, request_id: Option<&RequestId>) -> AuditResult<Vec<AuditEntry>> {
        self.storage.entries(request_id)
    }

    /// Check every entry's hash and every link.
    ///
    /// The first surviving entry is the anchor: its `previous_hash` may point
    /// at an entry removed by retention pruning.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries cannot be loaded.
    pub fn verify_chain(&self) -> AuditResult<ChainVerificationResult> {
        let entries = self.storage.entries(None)?;
        let mut issues = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            if !entry.is_intact() {
                issues.push(ChainIssue::HashMismatch {
                    entry_id: entry.id,
                    sequence: entry.sequence,
                });
            }
            if let Some(prev) = i.checked_sub(1).and_then(|p| entries.get(p))
                && !entry.follows(prev)
            {
                issues.push(ChainIssue::BrokenLink {
                    entry_id: entry.id,
                    sequence: entry.sequence,
                    expected: prev.content_hash,
                    actual: entry.previous_hash,
                });
            }
        }

        if !issues.is_empty() {
            warn!(issues = issues.len(), "Audit chain verification failed");
        }
        Ok(ChainVerificationResult {
            valid: issues.is_empty(),
            entries_verified: entries.len(),
            issues,
        })
    }

    /// Drop entries older than `retention_days` before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn prune(&self, retention_days: u32, now: Timestamp) -> AuditResult<usize> {
        let cutoff = now.minus_secs(u64::from(retention_days).saturating_mul(SECS_PER_DAY));
        let removed = self.storage.prune_before(cutoff)?;
        debug!(removed, %cutoff, "Audit entries pruned");
        Ok(removed)
    }
}

/// Outcome of [`AuditLog::verify_chain`].
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    /// Whether no issues were found.
    pub valid: bool,
    /// Number of entries examined.
    pub entries_verified: usize,
    /// Everything that failed.
    pub issues: Vec<ChainIssue>,
}

/// A single chain integrity problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainIssue {
    /// The entry's contents no longer match its hash.
    HashMismatch {
        /// Offending entry.
        entry_id: AuditEntryId,
        /// Its position.
        sequence: i64,
    },
    /// The entry does not link to its predecessor.
    BrokenLink {
        /// Offending entry.
        entry_id: AuditEntryId,
        /// Its position.
        sequence: i64,
        /// Hash of the predecessor.
        expected: ContentHash,
        /// Link actually stored.
        actual: ContentHash,
    },
}

impl std::fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashMismatch { entry_id, sequence } => {
                write!(f, "#{sequence} {entry_id}: content hash mismatch")
            },
            Self::BrokenLink {
                entry_id, sequence, ..
            } => write!(f, "#{sequence} {entry_id}: does not link to previous entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAuditStorage;
    use slb_core::{RequestStatus, RiskTier};

    fn created() -> AuditAction {
        AuditAction::RequestCreated {
            command: "rm -rf ./build".into(),
            tier: RiskTier::Dangerous,
            min_approvals: 1,
            require_different_model: false,
        }
    }

    #[test]
    fn test_append_links_to_head() {
        let log = AuditLog::new(MemoryAuditStorage::new());
        let req = RequestId::new();
        let now = Timestamp::now();
        let a = log.append(Some(req), None, created(), now).unwrap();
        let b = log
            .append(
                Some(req),
                None,
                AuditAction::StatusChanged {
                    from: RequestStatus::Pending,
                    to: RequestStatus::Rejected,
                    reason: "rejected by review".into(),
                },
                now,
            )
            .unwrap();
        assert!(a.previous_hash.is_zero());
        assert!(b.follows(&a));

        let result = log.verify_chain().unwrap();
        assert!(result.valid);
        assert_eq!(result.entries_verified, 2);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let store = MemoryAuditStorage::new();
        let now = Timestamp::now();
        {
            let log = AuditLog::new(&store);
            log.append(None, None, created(), now).unwrap();
            log.append(None, None, AuditAction::ApprovalExpired, now).unwrap();
        }
        // Rewrite the first entry's action behind the log's back.
        let mut entries = store.entries(None).unwrap();
        entries[0].action = AuditAction::RateLimitsReset;
        let tampered = MemoryAuditStorage::new();
        for e in &entries {
            tampered.store(e).unwrap();
        }

        let result = AuditLog::new(&tampered).verify_chain().unwrap();
        assert!(!result.valid);
        assert!(matches!(result.issues[0], ChainIssue::HashMismatch { sequence: 1, .. }));
    }

    #[test]
    fn test_prune_keeps_chain_verifiable() {
        let log = AuditLog::new(MemoryAuditStorage::new());
        let now = Timestamp::now();
        log.append(None, None, created(), now.minus_secs(400 * SECS_PER_DAY))
            .unwrap();
        log.append(None, None, AuditAction::ApprovalExpired, now).unwrap();
        log.append(None, None, AuditAction::RateLimitsReset, now).unwrap();

        assert_eq!(log.prune(365, now).unwrap(), 1);
        let result = log.verify_chain().unwrap();
        assert!(result.valid, "{:?}", result.issues);
        assert_eq!(result.entries_verified, 2);
    }
}
