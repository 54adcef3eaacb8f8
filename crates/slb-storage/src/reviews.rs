//! Review rows. Reviews are append-only; there is no update or delete.

use rusqlite::{Row, params};

use slb_core::{RequestId, Review, SessionId, Timestamp};

use crate::error::{StorageError, StorageResult};
use crate::ledger::{LedgerTx, parse_col, ts_col};

const REVIEW_COLUMNS: &str = "id, request_id, reviewer_session_id, reviewer_agent, \
     reviewer_model, decision, comments, signature, created_at";

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    let id: String = row.get(0)?;
    let request: String = row.get(1)?;
    let reviewer: String = row.get(2)?;
    let decision: String = row.get(5)?;
    let created: String = row.get(8)?;
    Ok(Review {
        id: parse_col(0, &id)?,
        request_id: parse_col(1, &request)?,
        reviewer_session_id: parse_col(2, &reviewer)?,
        reviewer_agent: row.get(3)?,
        reviewer_model: row.get(4)?,
        decision: parse_col(5, &decision)?,
        comments: row.get(6)?,
        signature: row.get(7)?,
        created_at: ts_col(8, &created)?,
    })
}

impl LedgerTx<'_> {
    /// Append a review.
    ///
    /// One vote per reviewer per review round is enforced by the caller with
    /// [`LedgerTx::has_reviewed`] inside the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the review id already exists.
    pub fn insert_review(&self, review: &Review) -> StorageResult<()> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO reviews ({REVIEW_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    review.id.to_string(),
                    review.request_id.to_string(),
                    review.reviewer_session_id.to_string(),
                    review.reviewer_agent,
                    review.reviewer_model,
                    review.decision.as_str(),
                    review.comments,
                    review.signature,
                    review.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match StorageError::from(e) {
                StorageError::Conflict(_) => {
                    StorageError::Conflict(format!("review {} already exists", review.id))
                },
                other => other,
            })?;
        Ok(())
    }

    /// All reviews of a request in submission order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn reviews_for(&self, request_id: &RequestId) -> StorageResult<Vec<Review>> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE request_id = ?1 \
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let reviews = stmt
            .query_map(params![request_id.to_string()], review_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reviews)
    }

    /// Whether `reviewer` voted on `request_id` at or after `since` (ever,
    /// when `since` is `None`).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn has_reviewed(
        &self,
        request_id: &RequestId,
        reviewer: &SessionId,
        since: Option<Timestamp>,
    ) -> StorageResult<bool> {
        let n: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM reviews WHERE request_id = ?1 AND reviewer_session_id = ?2 \
               AND (?3 IS NULL OR created_at >= ?3)",
            params![
                request_id.to_string(),
                reviewer.to_string(),
                since.map(|t| t.to_rfc3339())
            ],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Ledger, StorageError};
    use slb_core::{
        ConflictResolution, Decision, Justification, Request, RequestId, RequestStatus, Review,
        ReviewId, RiskTier, Session, SessionId, Timestamp,
    };
    use slb_crypto::SessionKey;
    use std::path::PathBuf;

    fn seed(ledger: &Ledger) -> RequestId {
        let now = Timestamp::now();
        let session = Session {
            id: SessionId::new(),
            agent_name: "BlueLake".into(),
            program: "codex".into(),
            model: "gpt-5".into(),
            project_path: PathBuf::from("/p"),
            human: false,
            created_at: now,
            last_active: now,
            ended_at: None,
        };
        let req = Request {
            id: RequestId::new(),
            command: "git push --force".into(),
            display_command: "git push --force".into(),
            cwd: PathBuf::from("/p"),
            shell: false,
            risk_tier: RiskTier::Dangerous,
            min_approvals: 1,
            require_different_model: false,
            conflict_resolution: ConflictResolution::FirstWins,
            status: RequestStatus::Pending,
            requester_session_id: session.id,
            requester_agent: session.agent_name.clone(),
            requester_model: session.model.clone(),
            justification: Justification::default(),
            project_path: PathBuf::from("/p"),
            dry_run_command: None,
            created_at: now,
            request_deadline: now.plus_secs(60),
            approval_ttl_deadline: None,
            escalated: false,
            awaiting_tie_break: false,
            resolved_at: None,
            reviews_reset_at: None,
            execution: None,
        };
        ledger
            .write(|tx| {
                tx.insert_session(&session, &SessionKey::generate())?;
                tx.insert_request(&req)
            })
            .unwrap();
        req.id
    }

    fn review(request_id: RequestId, reviewer: SessionId, decision: Decision) -> Review {
        Review {
            id: ReviewId::new(),
            request_id,
            reviewer_session_id: reviewer,
            reviewer_agent: "GreenHill".into(),
            reviewer_model: "claude".into(),
            decision,
            comments: String::new(),
            signature: "00".into(),
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_duplicate_review_id_is_conflict() {
        let ledger = Ledger::open_in_memory().unwrap();
        let req = seed(&ledger);
        let vote = review(req, SessionId::new(), Decision::Approve);
        ledger.write(|tx| tx.insert_review(&vote)).unwrap();
        let err = ledger.write(|tx| tx.insert_review(&vote)).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(msg) if msg.contains("already exists")));
        assert_eq!(ledger.read(|tx| tx.reviews_for(&req)).unwrap().len(), 1);
    }

    #[test]
    fn test_has_reviewed_respects_round_start() {
        let ledger = Ledger::open_in_memory().unwrap();
        let req = seed(&ledger);
        let reviewer = SessionId::new();
        let vote = review(req, reviewer, Decision::Approve);
        ledger.write(|tx| tx.insert_review(&vote)).unwrap();

        assert!(ledger.read(|tx| tx.has_reviewed(&req, &reviewer, None)).unwrap());
        assert!(
            ledger
                .read(|tx| tx.has_reviewed(&req, &reviewer, Some(vote.created_at)))
                .unwrap()
        );
        let later = vote.created_at.plus_secs(1);
        assert!(!ledger.read(|tx| tx.has_reviewed(&req, &reviewer, Some(later))).unwrap());
        assert!(!ledger.read(|tx| tx.has_reviewed(&req, &SessionId::new(), None)).unwrap());
    }

    #[test]
    fn test_reviews_keep_submission_order() {
        let ledger = Ledger::open_in_memory().unwrap();
        let req = seed(&ledger);
        let first = review(req, SessionId::new(), Decision::Reject);
        let second = review(req, SessionId::new(), Decision::Approve);
        ledger
            .write(|tx| {
                tx.insert_review(&first)?;
                tx.insert_review(&second)
            })
            .unwrap();
        let ids: Vec<_> = ledger
            .read(|tx| tx.reviews_for(&req))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
