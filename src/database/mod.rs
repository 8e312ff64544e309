pub mod models;
pub mod repositories;

use chrono::{DateTime, Utc};
use log::debug;
use repositories::{ConfigRepository, GroupRepository, PhotoRepository, SessionRepository};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Session {0} is already finished")]
    SessionClosed(String),

    #[error("Database location error: {0}")]
    Location(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS photos (
    library_id       TEXT PRIMARY KEY NOT NULL,
    path             TEXT NOT NULL,
    name             TEXT NOT NULL,
    size             INTEGER NOT NULL DEFAULT 0,
    width            INTEGER NOT NULL DEFAULT 0,
    height           INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT,
    modified_at      TEXT,
    fingerprint      TEXT,
    fingerprint_kind TEXT,
    quality_score    REAL NOT NULL DEFAULT 0.5,
    is_duplicate     INTEGER NOT NULL DEFAULT 0,
    is_deleted       INTEGER NOT NULL DEFAULT 0,
    first_seen_at    TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_fingerprint ON photos(fingerprint);

CREATE TABLE IF NOT EXISTS duplicate_groups (
    id                  TEXT PRIMARY KEY NOT NULL,
    group_key           TEXT NOT NULL UNIQUE,
    member_count        INTEGER NOT NULL DEFAULT 0,
    total_size          INTEGER NOT NULL DEFAULT 0,
    recommended_keep_id TEXT REFERENCES photos(library_id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_photos (
    group_id TEXT NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
    photo_id TEXT NOT NULL REFERENCES photos(library_id),
    added_at TEXT NOT NULL,
    PRIMARY KEY (group_id, photo_id)
);

CREATE INDEX IF NOT EXISTS idx_group_photos_photo ON group_photos(photo_id);

CREATE TABLE IF NOT EXISTS analysis_sessions (
    id                      TEXT PRIMARY KEY NOT NULL,
    total_photos            INTEGER NOT NULL,
    analyzed_photos         INTEGER NOT NULL DEFAULT 0,
    duplicates_found        INTEGER NOT NULL DEFAULT 0,
    bytes_analyzed          INTEGER NOT NULL DEFAULT 0,
    bytes_potentially_saved INTEGER NOT NULL DEFAULT 0,
    started_at              TEXT NOT NULL,
    ended_at                TEXT,
    status                  TEXT NOT NULL,
    error_message           TEXT
);

CREATE TABLE IF NOT EXISTS app_config (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Owns the single SQLite connection backing photos, groups and sessions.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path.as_ref())?;
        // journal_mode reports the resulting mode as a row
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Opened {} (journal mode {})", path.as_ref().display(), mode);
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;
        debug!("Database schema initialized");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn photos(&self) -> PhotoRepository<'_> {
        PhotoRepository::new(&self.conn)
    }

    pub fn groups(&self) -> GroupRepository<'_> {
        GroupRepository::new(&self.conn)
    }

    pub fn sessions(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.conn)
    }

    pub fn config(&self) -> ConfigRepository<'_> {
        ConfigRepository::new(&self.conn)
    }
}

pub fn get_database_path() -> Result<PathBuf, DatabaseError> {
    let data_dir = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| DatabaseError::Location("Could not find a data directory".to_string()))?;

    let app_dir = data_dir.join("dupsweep");
    std::fs::create_dir_all(&app_dir).map_err(|e| {
        DatabaseError::Location(format!("Could not create {}: {}", app_dir.display(), e))
    })?;

    Ok(app_dir.join("dupsweep.db"))
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn to_timestamp(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

pub(crate) fn from_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_connection() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::open(&db_path).unwrap();
        let result: i64 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 1);

        // Reopening an existing file keeps the schema intact
        drop(db);
        let db = Database::open(&db_path).unwrap();
        let tables: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('photos', 'duplicate_groups', 'group_photos', 'analysis_sessions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().unwrap();
        let enabled: i64 = db
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_timestamp_helpers() {
        let now = Utc::now();
        let stored = to_timestamp(Some(&now));
        assert_eq!(from_timestamp(stored), Some(now));
        assert_eq!(from_timestamp(Some("not a date".to_string())), None);
    }
}
