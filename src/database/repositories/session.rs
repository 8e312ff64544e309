use super::{DatabaseError, Repository};
use crate::database::models::{AnalysisSession, SessionStatus, SessionUpdate};
use crate::database::now;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, total_photos, analyzed_photos, duplicates_found, bytes_analyzed, \
     bytes_potentially_saved, started_at, ended_at, status, error_message";

fn session_from_row(row: &Row) -> rusqlite::Result<AnalysisSession> {
    Ok(AnalysisSession {
        id: row.get(0)?,
        total_photos: row.get::<_, i64>(1)?.max(0) as u64,
        analyzed_photos: row.get::<_, i64>(2)?.max(0) as u64,
        duplicates_found: row.get::<_, i64>(3)?.max(0) as u64,
        bytes_analyzed: row.get::<_, i64>(4)?.max(0) as u64,
        bytes_potentially_saved: row.get::<_, i64>(5)?.max(0) as u64,
        started_at: row.get(6)?,
        ended_at: row.get(7)?,
        status: SessionStatus::from(row.get::<_, String>(8)?),
        error_message: row.get(9)?,
    })
}

/// Append-only audit trail of analysis runs.
pub struct SessionRepository<'a> {
    conn: &'a Connection,
}

impl Repository for SessionRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> SessionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn start_session(&self, total_photos: u64) -> Result<String, DatabaseError> {
        let id = format!("ses_{}", Uuid::new_v4().simple());
        self.conn.execute(
            "INSERT INTO analysis_sessions (id, total_photos, started_at, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                total_photos as i64,
                now(),
                SessionStatus::Running.as_str()
            ],
        )?;
        Ok(id)
    }

    /// Apply a merge patch. Status only moves forward: a finished session
    /// rejects every further update.
    pub fn update_session(
        &self,
        id: &str,
        update: &SessionUpdate,
    ) -> Result<AnalysisSession, DatabaseError> {
        let tx = self.transaction()?;
        let sql = format!("SELECT {} FROM analysis_sessions WHERE id = ?1", SESSION_COLUMNS);
        let mut session = tx
            .query_row(&sql, params![id], session_from_row)
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("session {}", id)))?;

        if session.status.is_terminal() {
            return Err(DatabaseError::SessionClosed(id.to_string()));
        }

        if let Some(value) = update.analyzed_photos {
            session.analyzed_photos = value;
        }
        if let Some(value) = update.duplicates_found {
            session.duplicates_found = value;
        }
        if let Some(value) = update.bytes_analyzed {
            session.bytes_analyzed = value;
        }
        if let Some(value) = update.bytes_potentially_saved {
            session.bytes_potentially_saved = value;
        }
        if let Some(message) = &update.error_message {
            session.error_message = Some(message.clone());
        }
        if let Some(status) = update.status {
            session.status = status;
            if status.is_terminal() {
                session.ended_at = Some(now());
            }
        }

        tx.execute(
            "UPDATE analysis_sessions SET
                analyzed_photos = ?2, duplicates_found = ?3, bytes_analyzed = ?4,
                bytes_potentially_saved = ?5, ended_at = ?6, status = ?7, error_message = ?8
             WHERE id = ?1",
            params![
                session.id,
                session.analyzed_photos as i64,
                session.duplicates_found as i64,
                session.bytes_analyzed as i64,
                session.bytes_potentially_saved as i64,
                session.ended_at,
                session.status.as_str(),
                session.error_message,
            ],
        )?;
        tx.commit()?;
        Ok(session)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<AnalysisSession>, DatabaseError> {
        let sql = format!("SELECT {} FROM analysis_sessions WHERE id = ?1", SESSION_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], session_from_row)
            .optional()?)
    }

    pub fn get_latest_session(&self) -> Result<Option<AnalysisSession>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM analysis_sessions ORDER BY rowid DESC LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [], session_from_row).optional()?)
    }

    /// Most recent first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<AnalysisSession>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM analysis_sessions ORDER BY rowid DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_start_and_complete_session() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.sessions();

        let id = repo.start_session(42).unwrap();
        assert!(id.starts_with("ses_"));

        let running = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert_eq!(running.total_photos, 42);
        assert!(running.ended_at.is_none());

        let done = repo
            .update_session(
                &id,
                &SessionUpdate {
                    analyzed_photos: Some(40),
                    duplicates_found: Some(3),
                    status: Some(SessionStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.analyzed_photos, 40);
        assert!(done.ended_at.is_some());
    }

    #[test]
    fn test_update_is_a_merge_patch() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.sessions();
        let id = repo.start_session(10).unwrap();

        repo.update_session(
            &id,
            &SessionUpdate {
                analyzed_photos: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
        let session = repo
            .update_session(
                &id,
                &SessionUpdate {
                    bytes_analyzed: Some(9000),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(session.analyzed_photos, 5);
        assert_eq!(session.bytes_analyzed, 9000);
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[test]
    fn test_terminal_session_is_immutable() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.sessions();
        let id = repo.start_session(1).unwrap();

        repo.update_session(
            &id,
            &SessionUpdate {
                status: Some(SessionStatus::Error),
                error_message: Some("store went away".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let result = repo.update_session(
            &id,
            &SessionUpdate {
                status: Some(SessionStatus::Completed),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DatabaseError::SessionClosed(_))));

        let session = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_message.as_deref(), Some("store went away"));
    }

    #[test]
    fn test_latest_session() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.sessions();
        assert!(repo.get_latest_session().unwrap().is_none());

        repo.start_session(1).unwrap();
        let second = repo.start_session(2).unwrap();

        assert_eq!(repo.get_latest_session().unwrap().unwrap().id, second);
        assert_eq!(repo.list_sessions(10).unwrap().len(), 2);
        assert_eq!(repo.list_sessions(1).unwrap()[0].id, second);
    }

    #[test]
    fn test_update_unknown_session() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .sessions()
            .update_session("ses_missing", &SessionUpdate::default());
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }
}
