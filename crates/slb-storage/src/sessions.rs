//! Session rows and their secret keys.

use rusqlite::{OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use slb_core::{Session, SessionId, Timestamp};
use slb_crypto::SessionKey;

use crate::error::{StorageError, StorageResult};
use crate::ledger::{LedgerTx, opt_ts_col, parse_col, path_text, ts_col};

const SESSION_COLUMNS: &str =
    "id, agent_name, program, model, project_path, human, created_at, last_active, ended_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let project: String = row.get(4)?;
    let created: String = row.get(6)?;
    let active: String = row.get(7)?;
    Ok(Session {
        id: parse_col(0, &id)?,
        agent_name: row.get(1)?,
        program: row.get(2)?,
        model: row.get(3)?,
        project_path: PathBuf::from(project),
        human: row.get(5)?,
        created_at: ts_col(6, &created)?,
        last_active: ts_col(7, &active)?,
        ended_at: opt_ts_col(8, row.get(8)?)?,
    })
}

impl LedgerTx<'_> {
    /// Persist a new session together with its key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the id already exists.
    pub fn insert_session(&self, session: &Session, key: &SessionKey) -> StorageResult<()> {
        self.tx.execute(
            "INSERT INTO sessions (id, agent_name, program, model, project_path, human, \
             session_key, created_at, last_active, ended_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id.to_string(),
                session.agent_name,
                session.program,
                session.model,
                path_text(&session.project_path),
                session.human,
                key.to_hex(),
                session.created_at.to_rfc3339(),
                session.last_active.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Load a session.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails or the row is malformed.
    pub fn get_session(&self, id: &SessionId) -> StorageResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![id.to_string()], session_from_row)
            .optional()?)
    }

    /// The stored key for a session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored key is corrupt.
    pub fn session_key(&self, id: &SessionId) -> StorageResult<Option<SessionKey>> {
        let hex: Option<String> = self
            .tx
            .query_row(
                "SELECT session_key FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        hex.map(|h| {
            SessionKey::from_hex(&h)
                .map_err(|e| StorageError::Serialization(format!("session key for {id}: {e}")))
        })
        .transpose()
    }

    /// Mark a session ended. Returns `false` if it was missing or already ended.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn end_session(&self, id: &SessionId, at: Timestamp) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE sessions SET ended_at = ?2, last_active = ?2 \
             WHERE id = ?1 AND ended_at IS NULL",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Refresh `last_active`. Returns `false` for missing or ended sessions.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn touch_session(&self, id: &SessionId, at: Timestamp) -> StorageResult<bool> {
        let changed = self.tx.execute(
            "UPDATE sessions SET last_active = ?2 WHERE id = ?1 AND ended_at IS NULL",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Sessions, newest first, optionally limited to one project and to active ones.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_sessions(
        &self,
        project: Option<&Path>,
        active_only: bool,
    ) -> StorageResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE (?1 IS NULL OR project_path = ?1) AND (?2 = 0 OR ended_at IS NULL) \
             ORDER BY created_at DESC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![project.map(path_text), active_only], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use crate::Ledger;
    use slb_core::{Session, SessionId, Timestamp};
    use slb_crypto::SessionKey;
    use std::path::PathBuf;

    fn session(agent: &str, project: &str) -> Session {
        let now = Timestamp::now();
        Session {
            id: SessionId::new(),
            agent_name: agent.into(),
            program: "codex".into(),
            model: "gpt-5".into(),
            project_path: PathBuf::from(project),
            human: false,
            created_at: now,
            last_active: now,
            ended_at: None,
        }
    }

    #[test]
    fn test_session_roundtrip_with_key() {
        let ledger = Ledger::open_in_memory().unwrap();
        let s = session("BlueLake", "/work/app");
        let key = SessionKey::generate();
        ledger.write(|tx| tx.insert_session(&s, &key)).unwrap();

        let loaded = ledger.read(|tx| tx.get_session(&s.id)).unwrap().unwrap();
        assert_eq!(loaded, s);
        let stored = ledger.read(|tx| tx.session_key(&s.id)).unwrap().unwrap();
        assert!(stored.verify_presented(&key).is_ok());
    }

    #[test]
    fn test_end_session_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let s = session("BlueLake", "/work/app");
        ledger
            .write(|tx| tx.insert_session(&s, &SessionKey::generate()))
            .unwrap();
        let at = Timestamp::now();
        assert!(ledger.write(|tx| tx.end_session(&s.id, at)).unwrap());
        assert!(!ledger.write(|tx| tx.end_session(&s.id, at)).unwrap());
        assert!(!ledger.write(|tx| tx.touch_session(&s.id, at)).unwrap());

        let loaded = ledger.read(|tx| tx.get_session(&s.id)).unwrap().unwrap();
        assert!(!loaded.is_active());
    }

    #[test]
    fn test_list_filters_project_and_activity() {
        let ledger = Ledger::open_in_memory().unwrap();
        let a = session("A", "/p1");
        let b = session("B", "/p1");
        let c = session("C", "/p2");
        ledger
            .write(|tx| {
                for s in [&a, &b, &c] {
                    tx.insert_session(s, &SessionKey::generate())?;
                }
                tx.end_session(&b.id, Timestamp::now())
            })
            .unwrap();

        let p1 = std::path::Path::new("/p1");
        let all_p1 = ledger.read(|tx| tx.list_sessions(Some(p1), false)).unwrap();
        assert_eq!(all_p1.len(), 2);
        let active_p1 = ledger.read(|tx| tx.list_sessions(Some(p1), true)).unwrap();
        assert_eq!(active_p1.len(), 1);
        assert_eq!(active_p1[0].agent_name, "A");
        let everything = ledger.read(|tx| tx.list_sessions(None, false)).unwrap();
        assert_eq!(everything.len(), 3);
    }
}
