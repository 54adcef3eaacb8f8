//! Request rows and the status compare-and-swap.
//!
//! Status only ever changes through statements of the form
//! `UPDATE requests SET status = ?to ... WHERE id = ? AND status = ?from`, and
//! callers learn from the affected-row count whether they won the race.

use rusqlite::{OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use slb_core::{ExecutionRecord, Request, RequestId, RequestStatus, SessionId, Timestamp};

use crate::error::StorageResult;
use crate::ledger::{LedgerTx, opt_ts_col, parse_col, path_text, ts_col};

const REQUEST_COLUMNS: &str = "id, command, display_command, cwd, shell, risk_tier, \
     min_approvals, require_different_model, conflict_resolution, status, \
     requester_session_id, requester_agent, requester_model, justification, project_path, \
     dry_run_command, created_at, request_deadline, approval_ttl_deadline, escalated, \
     awaiting_tie_break, resolved_at, exit_code, duration_ms, log_path, rollback_path, executed_at, \
     reviews_reset_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<Request> {
    let id: String = row.get(0)?;
    let cwd: String = row.get(3)?;
    let tier: String = row.get(5)?;
    let policy: String = row.get(8)?;
    let status: String = row.get(9)?;
    let requester: String = row.get(10)?;
    let justification: String = row.get(13)?;
    let project: String = row.get(14)?;
    let created: String = row.get(16)?;
    let deadline: String = row.get(17)?;

    let exit_code: Option<i32> = row.get(22)?;
    let execution = match (exit_code, opt_ts_col(26, row.get(26)?)?) {
        (Some(exit_code), Some(executed_at)) => {
            let duration: i64 = row.get::<_, Option<i64>>(23)?.unwrap_or(0);
            Some(ExecutionRecord {
                exit_code,
                duration_ms: u64::try_from(duration).unwrap_or(0),
                log_path: row.get::<_, Option<String>>(24)?.map(PathBuf::from),
                rollback_path: row.get::<_, Option<String>>(25)?.map(PathBuf::from),
                executed_at,
            })
        },
        _ => None,
    };

    Ok(Request {
        id: parse_col(0, &id)?,
        command: row.get(1)?,
        display_command: row.get(2)?,
        cwd: PathBuf::from(cwd),
        shell: row.get(4)?,
        risk_tier: parse_col(5, &tier)?,
        min_approvals: row.get(6)?,
        require_different_model: row.get(7)?,
        conflict_resolution: parse_col(8, &policy)?,
        status: parse_col(9, &status)?,
        requester_session_id: parse_col(10, &requester)?,
        requester_agent: row.get(11)?,
        requester_model: row.get(12)?,
        justification: serde_json::from_str(&justification).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
        })?,
        project_path: PathBuf::from(project),
        dry_run_command: row.get(15)?,
        created_at: ts_col(16, &created)?,
        request_deadline: ts_col(17, &deadline)?,
        approval_ttl_deadline: opt_ts_col(18, row.get(18)?)?,
        escalated: row.get(19)?,
        awaiting_tie_break: row.get(20)?,
        resolved_at: opt_ts_col(21, row.get(21)?)?,
        reviews_reset_at: opt_ts_col(27, row.get(27)?)?,
        execution,
    })
}

/// Selection criteria for [`LedgerTx::list_requests`].
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Only requests in this state.
    pub status: Option<RequestStatus>,
    /// Only requests from this project.
    pub project: Option<PathBuf>,
    /// Only requests opened by this session.
    pub requester: Option<SessionId>,
    /// Cap on rows returned.
    pub limit: Option<u32>,
}

impl RequestFilter {
    /// Pending requests, optionally scoped to a project.
    #[must_use]
    pub fn pending(project: Option<&Path>) -> Self {
        Self {
            status: Some(RequestStatus::Pending),
            project: project.map(Path::to_path_buf),
            ..Self::default()
        }
    }
}

impl LedgerTx<'_> {
    /// Persist a new request row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Conflict`] if the id exists or the
    /// requester session is unknown.
    pub fn insert_request(&self, req: &Request) -> StorageResult<()> {
        let justification = serde_json::to_string(&req.justification)?;
        let exec = req.execution.as_ref();
        self.tx.execute(
            &format!(
                "INSERT INTO requests ({REQUEST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                 ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, \
                 ?25, ?26, ?27, ?28)"
            ),
            params![
                req.id.to_string(),
                req.command,
                req.display_command,
                path_text(&req.cwd),
                req.shell,
                req.risk_tier.as_str(),
                req.min_approvals,
                req.require_different_model,
                req.conflict_resolution.as_str(),
                req.status.as_str(),
                req.requester_session_id.to_string(),
                req.requester_agent,
                req.requester_model,
                justification,
                path_text(&req.project_path),
                req.dry_run_command,
                req.created_at.to_rfc3339(),
                req.request_deadline.to_rfc3339(),
                req.approval_ttl_deadline.map(|t| t.to_rfc3339()),
                req.escalated,
                req.awaiting_tie_break,
                req.resolved_at.map(|t| t.to_rfc3339()),
                exec.map(|e| e.exit_code),
                exec.map(|e| duration_col(e.duration_ms)),
                exec.and_then(|e| e.log_path.as_deref().map(path_text)),
                exec.and_then(|e| e.rollback_path.as_deref().map(path_text)),
                exec.map(|e| e.executed_at.to_rfc3339()),
                req.reviews_reset_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Load a request.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails or the row is malformed.
    pub fn get_request(&self, id: &RequestId) -> StorageResult<Option<Request>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![id.to_string()], request_from_row)
            .optional()?)
    }

    /// Compare-and-swap the status from `from` to `to`.
    ///
    /// Entering a terminal state stamps `resolved_at`. Reverting to
    /// [`RequestStatus::Pending`] clears the approval deadline. Returns `false`
    /// when the stored status was not `from`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn transition_status(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: Timestamp,
    ) -> StorageResult<bool> {
        let resolved_at = to.is_terminal().then(|| at.to_rfc3339());
        let changed = self.tx.execute(
            "UPDATE requests SET status = ?3, \
                 resolved_at = COALESCE(?4, resolved_at), \
                 approval_ttl_deadline = CASE WHEN ?3 = 'pending' THEN NULL \
                                              ELSE approval_ttl_deadline END, \
                 awaiting_tie_break = CASE WHEN ?3 = 'pending' THEN awaiting_tie_break ELSE 0 END \
             WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), resolved_at],
        )?;
        Ok(changed == 1)
    }

    /// Compare-and-swap `Pending -> Approved`, recording the approval deadline.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn approve_request(
        &self,
        id: &RequestId,
        approval_ttl_deadline: Timestamp,
    ) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE requests SET status = 'approved', approval_ttl_deadline = ?2, \
                 awaiting_tie_break = 0 \
             WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), approval_ttl_deadline.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Set or clear the tie-break hold on a pending request.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn set_awaiting_tie_break(&self, id: &RequestId, awaiting: bool) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE requests SET awaiting_tie_break = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), awaiting],
        )?;
        Ok(changed == 1)
    }

    /// Push the deadline of a pending, not yet escalated request. One-shot.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn extend_deadline(&self, id: &RequestId, deadline: Timestamp) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE requests SET request_deadline = ?2, escalated = 1 \
             WHERE id = ?1 AND status = 'pending' AND escalated = 0",
            params![id.to_string(), deadline.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Compare-and-swap a lapsed `Approved` request back to `Pending`.
    ///
    /// Earlier reviews stop counting from `at`, the deadline becomes
    /// `deadline`, and the one-shot escalation is re-armed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn revert_expired_approval(
        &self,
        id: &RequestId,
        at: Timestamp,
        deadline: Timestamp,
    ) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE requests SET status = 'pending', approval_ttl_deadline = NULL, \
                 reviews_reset_at = ?2, request_deadline = ?3, escalated = 0 \
             WHERE id = ?1 AND status = 'approved'",
            params![id.to_string(), at.to_rfc3339(), deadline.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Move an executing request to its terminal state with the run outcome.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn finish_execution(
        &self,
        id: &RequestId,
        to: RequestStatus,
        record: &ExecutionRecord,
    ) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE requests SET status = ?2, resolved_at = ?3, exit_code = ?4, \
                 duration_ms = ?5, log_path = ?6, rollback_path = ?7, executed_at = ?3 \
             WHERE id = ?1 AND status = 'executing'",
            params![
                id.to_string(),
                to.as_str(),
                record.executed_at.to_rfc3339(),
                record.exit_code,
                duration_col(record.duration_ms),
                record.log_path.as_deref().map(path_text),
                record.rollback_path.as_deref().map(path_text),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Requests matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_requests(&self, filter: &RequestFilter) -> StorageResult<Vec<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR project_path = ?2) \
               AND (?3 IS NULL OR requester_session_id = ?3) \
             ORDER BY created_at ASC, rowid ASC \
             LIMIT ?4"
        );
        let limit = filter.limit.map_or(-1, i64::from);
        let mut stmt = self.tx.prepare(&sql)?;
        let requests = stmt
            .query_map(
                params![
                    filter.status.map(RequestStatus::as_str),
                    filter.project.as_deref().map(path_text),
                    filter.requester.map(|s| s.to_string()),
                    limit,
                ],
                request_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    /// Pending requests whose deadline is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn pending_past_deadline(&self, now: Timestamp) -> StorageResult<Vec<Request>> {
        self.select_where(
            "status = 'pending' AND request_deadline <= ?1",
            &now.to_rfc3339(),
        )
    }

    /// Approved requests whose approval deadline is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn approvals_past_ttl(&self, now: Timestamp) -> StorageResult<Vec<Request>> {
        self.select_where(
            "status = 'approved' AND approval_ttl_deadline <= ?1",
            &now.to_rfc3339(),
        )
    }

    /// Number of pending requests opened by `session`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn pending_count_for_session(&self, session: &SessionId) -> StorageResult<u32> {
        let n: u32 = self.tx.query_row(
            "SELECT COUNT(*) FROM requests WHERE requester_session_id = ?1 AND status = 'pending'",
            params![session.to_string()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn select_where(&self, clause: &str, arg: &str) -> StorageResult<Vec<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE {clause} ORDER BY created_at ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let requests = stmt
            .query_map(params![arg], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }
}

fn duration_col(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;
    use slb_core::{ConflictResolution, Justification, RiskTier, Session};
    use slb_crypto::SessionKey;

    fn setup() -> (Ledger, Session) {
        let ledger = Ledger::open_in_memory().unwrap();
        let now = Timestamp::now();
        let session = Session {
            id: SessionId::new(),
            agent_name: "BlueLake".into(),
            program: "codex".into(),
            model: "gpt-5".into(),
            project_path: PathBuf::from("/work/app"),
            human: false,
            created_at: now,
            last_active: now,
            ended_at: None,
        };
        ledger
            .write(|tx| tx.insert_session(&session, &SessionKey::generate()))
            .unwrap();
        (ledger, session)
    }

    fn request(session: &Session, created_at: Timestamp) -> Request {
        Request {
            id: RequestId::new(),
            command: "rm -rf ./build".into(),
            display_command: "rm -rf ./build".into(),
            cwd: PathBuf::from("/work/app"),
            shell: true,
            risk_tier: RiskTier::Dangerous,
            min_approvals: 1,
            require_different_model: false,
            conflict_resolution: ConflictResolution::AnyRejectionBlocks,
            status: RequestStatus::Pending,
            requester_session_id: session.id,
            requester_agent: session.agent_name.clone(),
            requester_model: session.model.clone(),
            justification: Justification {
                reason: "stale artifacts".into(),
                ..Justification::default()
            },
            project_path: session.project_path.clone(),
            dry_run_command: Some("ls -la -- ./build".into()),
            created_at,
            request_deadline: created_at.plus_secs(1800),
            approval_ttl_deadline: None,
            escalated: false,
            awaiting_tie_break: false,
            reviews_reset_at: None,
            resolved_at: None,
            execution: None,
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let (ledger, session) = setup();
        let req = request(&session, Timestamp::now());
        ledger.write(|tx| tx.insert_request(&req)).unwrap();
        let loaded = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert_eq!(loaded, req);
    }

    #[test]
    fn test_transition_is_compare_and_swap() {
        let (ledger, session) = setup();
        let req = request(&session, Timestamp::now());
        ledger.write(|tx| tx.insert_request(&req)).unwrap();
        let at = Timestamp::now();

        assert!(
            ledger
                .write(|tx| tx.transition_status(&req.id, RequestStatus::Pending, RequestStatus::Rejected, at))
                .unwrap()
        );
        // Second writer loses: the row is no longer pending.
        assert!(
            !ledger
                .write(|tx| tx.transition_status(&req.id, RequestStatus::Pending, RequestStatus::Cancelled, at))
                .unwrap()
        );
        let loaded = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Rejected);
        assert_eq!(loaded.resolved_at, Some(at));
    }

    #[test]
    fn test_approve_then_revert_clears_deadline() {
        let (ledger, session) = setup();
        let req = request(&session, Timestamp::now());
        ledger.write(|tx| tx.insert_request(&req)).unwrap();
        let ttl = Timestamp::now().plus_secs(600);
        assert!(ledger.write(|tx| tx.approve_request(&req.id, ttl)).unwrap());
        assert!(!ledger.write(|tx| tx.approve_request(&req.id, ttl)).unwrap());

        let approved = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert_eq!(approved.approval_ttl_deadline, Some(ttl));

        ledger
            .write(|tx| {
                tx.transition_status(&req.id, RequestStatus::Approved, RequestStatus::Pending, ttl)
            })
            .unwrap();
        let reverted = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert_eq!(reverted.status, RequestStatus::Pending);
        assert_eq!(reverted.approval_ttl_deadline, None);
        assert_eq!(reverted.resolved_at, None);
    }

    #[test]
    fn test_finish_execution_records_outcome() {
        let (ledger, session) = setup();
        let req = request(&session, Timestamp::now());
        ledger.write(|tx| tx.insert_request(&req)).unwrap();
        let at = Timestamp::now();
        ledger
            .write(|tx| {
                tx.approve_request(&req.id, at.plus_secs(60))?;
                tx.transition_status(&req.id, RequestStatus::Approved, RequestStatus::Executing, at)
            })
            .unwrap();
        let record = ExecutionRecord {
            exit_code: 2,
            duration_ms: 150,
            log_path: Some(PathBuf::from("/work/app/.slb/logs/run.log")),
            rollback_path: None,
            executed_at: at,
        };
        assert!(
            ledger
                .write(|tx| tx.finish_execution(&req.id, RequestStatus::ExecutionFailed, &record))
                .unwrap()
        );
        let done = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::ExecutionFailed);
        assert_eq!(done.execution, Some(record));
    }

    #[test]
    fn test_deadline_extends_once() {
        let (ledger, session) = setup();
        let req = request(&session, Timestamp::now());
        ledger.write(|tx| tx.insert_request(&req)).unwrap();
        let later = req.request_deadline.plus_secs(1800);
        assert!(ledger.write(|tx| tx.extend_deadline(&req.id, later)).unwrap());
        assert!(!ledger.write(|tx| tx.extend_deadline(&req.id, later.plus_secs(1))).unwrap());
        let loaded = ledger.read(|tx| tx.get_request(&req.id)).unwrap().unwrap();
        assert!(loaded.escalated);
        assert_eq!(loaded.request_deadline, later);
    }

    #[test]
    fn test_due_queries_and_pending_count() {
        let (ledger, session) = setup();
        let now = Timestamp::now();
        let old = request(&session, now.minus_secs(3600));
        let fresh = request(&session, now);
        ledger
            .write(|tx| {
                tx.insert_request(&old)?;
                tx.insert_request(&fresh)
            })
            .unwrap();

        let due = ledger.read(|tx| tx.pending_past_deadline(now)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, old.id);
        assert_eq!(ledger.read(|tx| tx.pending_count_for_session(&session.id)).unwrap(), 2);

        let listed = ledger
            .read(|tx| tx.list_requests(&RequestFilter::pending(Some(Path::new("/work/app")))))
            .unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![old.id, fresh.id]);
    }
}
