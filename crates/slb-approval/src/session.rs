//! Session registration and reviewer authentication.
//!
//! A session's key is generated here, handed to the caller exactly once, and
//! afterwards only ever compared in constant time against what a reviewer
//! presents.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use slb_audit::{AuditAction, AuditLog};
use slb_config::Config;
use slb_core::{Session, SessionId, Timestamp};
use slb_crypto::SessionKey;
use slb_storage::LedgerTx;

use crate::error::{ApprovalError, ApprovalResult};

/// What a caller supplies to register a session.
#[derive(Debug, Clone, Default)]
pub struct RegisterSession {
    /// Agent name, e.g. `"BlueLake"`.
    pub agent_name: String,
    /// Program driving the agent.
    pub program: String,
    /// Model identifier.
    pub model: String,
    /// Project directory.
    pub project_path: PathBuf,
    /// Registered explicitly as a human reviewer.
    pub human: bool,
}

/// A freshly registered session and its key. The key is not stored anywhere
/// the caller can read it again.
#[derive(Debug)]
pub struct RegisteredSession {
    /// The session record.
    pub session: Session,
    /// The session's signing key.
    pub key: SessionKey,
}

/// Issues sessions and verifies the keys reviewers present.
#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    config: Arc<Config>,
}

impl SessionAuthenticator {
    /// Authenticator over a loaded configuration.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Register a new session and audit it.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Validation`] for an empty agent name or model,
    /// or a storage error.
    pub fn register(
        &self,
        tx: &LedgerTx<'_>,
        opts: RegisterSession,
        now: Timestamp,
    ) -> ApprovalResult<RegisteredSession> {
        let agent_name = opts.agent_name.trim().to_string();
        if agent_name.is_empty() {
            return Err(ApprovalError::Validation("agent name is required".into()));
        }
        let model = opts.model.trim().to_string();
        if model.is_empty() {
            return Err(ApprovalError::Validation("model is required".into()));
        }

        let human = opts.human || self.config.is_human_agent(&agent_name);
        let session = Session {
            id: SessionId::new(),
            agent_name,
            program: opts.program.trim().to_string(),
            model,
            project_path: opts.project_path,
            human,
            created_at: now,
            last_active: now,
            ended_at: None,
        };
        let key = SessionKey::generate();
        tx.insert_session(&session, &key)?;
        AuditLog::new(tx).append(
            None,
            Some(session.id),
            AuditAction::SessionStarted {
                agent: session.agent_name.clone(),
                model: session.model.clone(),
                human,
            },
            now,
        )?;

        info!(
            session_id = %session.id,
            agent = %session.agent_name,
            model = %session.model,
            human,
            "Session registered"
        );
        Ok(RegisteredSession { session, key })
    }

    /// Load an active session without checking a key.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown session and
    /// [`ApprovalError::Authentication`] for an ended one.
    pub fn active_session(&self, tx: &LedgerTx<'_>, id: &SessionId) -> ApprovalResult<Session> {
        let session = tx
            .get_session(id)?
            .ok_or_else(|| ApprovalError::session_not_found(id))?;
        if !session.is_active() {
            return Err(ApprovalError::Authentication(format!("session {id} has ended")));
        }
        Ok(session)
    }

    /// Verify that `presented` is the key issued to session `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Authentication`] ("session key mismatch") for a
    /// wrong or malformed key, and the errors of [`Self::active_session`].
    pub fn authenticate(
        &self,
        tx: &LedgerTx<'_>,
        id: &SessionId,
        presented: &str,
    ) -> ApprovalResult<(Session, SessionKey)> {
        let session = self.active_session(tx, id)?;
        let stored = tx
            .session_key(id)?
            .ok_or_else(|| ApprovalError::session_not_found(id))?;
        let matches = SessionKey::from_hex(presented.trim())
            .is_ok_and(|presented| stored.verify_presented(&presented).is_ok());
        if !matches {
            warn!(session_id = %id, "Session key mismatch");
            return Err(ApprovalError::Authentication(format!(
                "session key mismatch for session {id}"
            )));
        }
        Ok((session, stored))
    }

    /// End a session. Ending twice is a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] or [`ApprovalError::Conflict`].
    pub fn end(&self, tx: &LedgerTx<'_>, id: &SessionId, now: Timestamp) -> ApprovalResult<Session> {
        let mut session = tx
            .get_session(id)?
            .ok_or_else(|| ApprovalError::session_not_found(id))?;
        if !tx.end_session(id, now)? {
            return Err(ApprovalError::Conflict(format!("session {id} already ended")));
        }
        AuditLog::new(tx).append(
            None,
            Some(*id),
            AuditAction::SessionEnded {
                agent: session.agent_name.clone(),
            },
            now,
        )?;
        session.ended_at = Some(now);
        info!(session_id = %id, "Session ended");
        Ok(session)
    }

    /// Bump `last_active` on an active session.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::active_session`].
    pub fn heartbeat(&self, tx: &LedgerTx<'_>, id: &SessionId, now: Timestamp) -> ApprovalResult<Session> {
        let mut session = self.active_session(tx, id)?;
        tx.touch_session(id, now)?;
        session.last_active = now;
        Ok(session)
    }

    /// Start a fresh per-minute window for `id`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::active_session`].
    pub fn reset_rate_limits(&self, tx: &LedgerTx<'_>, id: &SessionId, now: Timestamp) -> ApprovalResult<()> {
        self.active_session(tx, id)?;
        tx.reset_rate_limits(id, now)?;
        AuditLog::new(tx).append(None, Some(*id), AuditAction::RateLimitsReset, now)?;
        info!(session_id = %id, "Rate limits reset");
        Ok(())
    }
}
