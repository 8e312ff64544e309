use super::{placeholders, DatabaseError, Repository};
use crate::core::fingerprint::{Fingerprint, FingerprintKind};
use crate::database::models::Photo;
use crate::database::{from_timestamp, now, to_timestamp};
use rusqlite::{params, params_from_iter, Connection, Row};

/// Photo columns, selected through the `p` alias.
pub(crate) const PHOTO_COLUMNS: &str = "p.library_id, p.path, p.name, p.size, p.width, p.height, \
     p.created_at, p.modified_at, p.fingerprint, p.fingerprint_kind, p.quality_score, \
     p.is_duplicate, p.is_deleted";

pub(crate) fn photo_from_row(row: &Row) -> rusqlite::Result<Photo> {
    Ok(Photo {
        library_id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        size: row.get::<_, i64>(3)?.max(0) as u64,
        width: row.get::<_, i64>(4)?.max(0) as u32,
        height: row.get::<_, i64>(5)?.max(0) as u32,
        created_at: from_timestamp(row.get(6)?),
        modified_at: from_timestamp(row.get(7)?),
        fingerprint: row.get(8)?,
        fingerprint_kind: row.get::<_, Option<String>>(9)?.map(FingerprintKind::from),
        quality_score: row.get(10)?,
        is_duplicate: row.get(11)?,
        is_deleted: row.get(12)?,
    })
}

/// Soft-delete inside an open transaction. Returns the number of rows flipped.
pub(crate) fn soft_delete_in(conn: &Connection, ids: &[String]) -> Result<usize, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE photos SET is_deleted = 1, updated_at = ?1
         WHERE is_deleted = 0 AND library_id IN ({})",
        placeholders(ids.len(), 1)
    );
    let stamp = now();
    let values = std::iter::once(stamp.as_str()).chain(ids.iter().map(String::as_str));
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

pub struct PhotoRepository<'a> {
    conn: &'a Connection,
}

impl Repository for PhotoRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> PhotoRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record an observation of a library photo. A known identifier is
    /// updated in place and revived if it was soft-deleted; its fingerprint
    /// is dropped when size or modification time changed.
    pub fn upsert(&self, photo: &Photo) -> Result<(), DatabaseError> {
        Self::upsert_in(self.conn, photo)
    }

    pub fn upsert_batch(&self, photos: &[Photo]) -> Result<usize, DatabaseError> {
        let tx = self.transaction()?;
        for photo in photos {
            Self::upsert_in(&tx, photo)?;
        }
        tx.commit()?;
        Ok(photos.len())
    }

    fn upsert_in(conn: &Connection, photo: &Photo) -> Result<(), DatabaseError> {
        let stamp = now();
        conn.execute(
            "INSERT INTO photos
                (library_id, path, name, size, width, height, created_at, modified_at,
                 fingerprint, fingerprint_kind, quality_score, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(library_id) DO UPDATE SET
                path = excluded.path,
                name = excluded.name,
                width = excluded.width,
                height = excluded.height,
                created_at = excluded.created_at,
                fingerprint = CASE
                    WHEN photos.size != excluded.size
                      OR IFNULL(photos.modified_at, '') != IFNULL(excluded.modified_at, '')
                    THEN excluded.fingerprint
                    ELSE COALESCE(excluded.fingerprint, photos.fingerprint) END,
                fingerprint_kind = CASE
                    WHEN photos.size != excluded.size
                      OR IFNULL(photos.modified_at, '') != IFNULL(excluded.modified_at, '')
                    THEN excluded.fingerprint_kind
                    ELSE COALESCE(excluded.fingerprint_kind, photos.fingerprint_kind) END,
                size = excluded.size,
                modified_at = excluded.modified_at,
                is_deleted = 0,
                updated_at = excluded.updated_at",
            params![
                photo.library_id,
                photo.path,
                photo.name,
                photo.size as i64,
                photo.width as i64,
                photo.height as i64,
                to_timestamp(photo.created_at.as_ref()),
                to_timestamp(photo.modified_at.as_ref()),
                photo.fingerprint,
                photo.fingerprint_kind.map(|k| k.as_str()),
                photo.quality_score,
                stamp,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Photo, DatabaseError> {
        let sql = format!("SELECT {} FROM photos p WHERE p.library_id = ?1", PHOTO_COLUMNS);
        self.conn
            .query_row(&sql, params![id], photo_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DatabaseError::NotFound(format!("photo {}", id))
                }
                other => DatabaseError::Query(other),
            })
    }

    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Photo>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM photos p WHERE p.library_id IN ({}) ORDER BY p.rowid",
            PHOTO_COLUMNS,
            placeholders(ids.len(), 0)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), photo_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every non-deleted photo in first-observation order.
    pub fn find_all_active(&self) -> Result<Vec<Photo>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM photos p WHERE p.is_deleted = 0 ORDER BY p.rowid",
            PHOTO_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], photo_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_fingerprint(
        &self,
        id: &str,
        fingerprint: &Fingerprint,
        kind: FingerprintKind,
    ) -> Result<(), DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE photos SET fingerprint = ?1, fingerprint_kind = ?2, updated_at = ?3
             WHERE library_id = ?4",
            params![fingerprint.to_hex(), kind.as_str(), now(), id],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("photo {}", id)));
        }
        Ok(())
    }

    pub fn count_duplicates(&self) -> Result<i64, DatabaseError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM photos WHERE is_deleted = 0 AND is_duplicate = 1",
            [],
            |row| row.get(0),
        )?)
    }
}
