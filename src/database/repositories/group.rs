use super::photo::{photo_from_row, soft_delete_in, PHOTO_COLUMNS};
use super::{placeholders, DatabaseError, Repository};
use crate::database::models::{Group, GroupMember};
use crate::database::now;
use log::debug;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

const GROUP_COLUMNS: &str = "g.id, g.group_key, g.member_count, g.total_size, \
     g.recommended_keep_id, g.created_at, g.updated_at";

fn group_from_row(row: &Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        group_key: row.get(1)?,
        member_count: row.get::<_, i64>(2)?.max(0) as u32,
        total_size: row.get::<_, i64>(3)?.max(0) as u64,
        recommended_keep_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        members: Vec::new(),
    })
}

/// Result of merging photos into an existing group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: Vec<String>,
    pub recommended_keep_id: Option<String>,
}

/// Where a cluster landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterWrite {
    pub group_id: String,
    pub created: bool,
    pub outcome: MergeOutcome,
    /// Groups that gave up members to this one, with their state afterwards.
    pub detached: Vec<(String, GroupRefresh)>,
}

/// State of a group after members left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRefresh {
    Updated { member_count: u32 },
    Removed,
}

/// Recompute member count and aggregate size from the live membership.
fn recompute_aggregates(conn: &Connection, group_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE duplicate_groups SET
            member_count = (
                SELECT COUNT(*) FROM group_photos gp
                JOIN photos p ON p.library_id = gp.photo_id
                WHERE gp.group_id = ?1 AND p.is_deleted = 0),
            total_size = (
                SELECT COALESCE(SUM(p.size), 0) FROM group_photos gp
                JOIN photos p ON p.library_id = gp.photo_id
                WHERE gp.group_id = ?1 AND p.is_deleted = 0),
            updated_at = ?2
         WHERE id = ?1",
        params![group_id, now()],
    )?;
    Ok(())
}

/// Live member ids ordered largest first; ties keep the earliest observed photo.
fn live_members_by_size(conn: &Connection, group_id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT p.library_id FROM group_photos gp
         JOIN photos p ON p.library_id = gp.photo_id
         WHERE gp.group_id = ?1 AND p.is_deleted = 0
         ORDER BY p.size DESC, p.rowid ASC",
    )?;
    let rows = stmt.query_map(params![group_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

fn photo_size(conn: &Connection, photo_id: &str) -> Result<i64, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT size FROM photos WHERE library_id = ?1",
            params![photo_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

fn set_duplicate_flag(conn: &Connection, photo_id: &str, flag: bool) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE photos SET is_duplicate = ?1, updated_at = ?2 WHERE library_id = ?3",
        params![flag, now(), photo_id],
    )?;
    Ok(())
}

fn set_recommended_keep(
    conn: &Connection,
    group_id: &str,
    keep_id: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE duplicate_groups SET recommended_keep_id = ?1 WHERE id = ?2",
        params![keep_id, group_id],
    )?;
    Ok(())
}

fn group_id_by_key(conn: &Connection, group_key: &str) -> Result<Option<String>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id FROM duplicate_groups WHERE group_key = ?1",
            params![group_key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Ids of every group holding any of `photo_ids`, oldest first.
fn group_ids_holding(conn: &Connection, photo_ids: &[String]) -> Result<Vec<String>, DatabaseError> {
    if photo_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT g.id FROM duplicate_groups g
         WHERE g.id IN (SELECT group_id FROM group_photos WHERE photo_id IN ({}))
         ORDER BY g.rowid",
        placeholders(photo_ids.len(), 0)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(photo_ids.iter()), |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

fn insert_group(
    conn: &Connection,
    group_key: &str,
    member_ids: &[String],
    recommended_keep_id: &str,
) -> Result<String, DatabaseError> {
    let stamp = now();
    let id = format!("grp_{}", Uuid::new_v4().simple());

    conn.execute(
        "INSERT INTO duplicate_groups (id, group_key, recommended_keep_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, group_key, recommended_keep_id, stamp],
    )?;
    for photo_id in member_ids {
        conn.execute(
            "INSERT OR IGNORE INTO group_photos (group_id, photo_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![id, photo_id, stamp],
        )?;
        set_duplicate_flag(conn, photo_id, photo_id != recommended_keep_id)?;
    }
    recompute_aggregates(conn, &id)?;
    Ok(id)
}

fn merge_members(
    conn: &Connection,
    group_id: &str,
    photo_ids: &[String],
) -> Result<MergeOutcome, DatabaseError> {
    let stamp = now();
    let current_keep: Option<String> = conn
        .query_row(
            "SELECT recommended_keep_id FROM duplicate_groups WHERE id = ?1",
            params![group_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound(format!("group {}", group_id)))?;

    let mut added = Vec::new();
    for photo_id in photo_ids {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO group_photos (group_id, photo_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![group_id, photo_id, stamp],
        )?;
        if inserted > 0 {
            added.push(photo_id.clone());
        }
    }

    let mut keep = current_keep.clone();
    if !added.is_empty() {
        let largest_new = added
            .iter()
            .map(|id| Ok((photo_size(conn, id)?, id)))
            .collect::<Result<Vec<_>, DatabaseError>>()?
            .into_iter()
            // max_by_key returns the last maximum; reverse so the first wins
            .rev()
            .max_by_key(|(size, _)| *size);
        let keep_size = match &current_keep {
            Some(id) => photo_size(conn, id)?,
            None => -1,
        };

        if let Some((size, candidate)) = largest_new {
            if size > keep_size {
                if let Some(previous) = &current_keep {
                    set_duplicate_flag(conn, previous, true)?;
                }
                set_recommended_keep(conn, group_id, Some(candidate.as_str()))?;
                keep = Some(candidate.clone());
            }
        }

        // Members moved in from another group may carry the opposite flag
        for photo_id in &added {
            set_duplicate_flag(conn, photo_id, Some(photo_id) != keep.as_ref())?;
        }
    }

    recompute_aggregates(conn, group_id)?;
    Ok(MergeOutcome {
        added,
        recommended_keep_id: keep,
    })
}

/// Recompute a group after members left it: re-pick the keep if it went
/// away, and remove the group once at most one live member remains.
fn repair_group(conn: &Connection, group_id: &str) -> Result<GroupRefresh, DatabaseError> {
    let live = live_members_by_size(conn, group_id)?;
    if live.len() <= 1 {
        for photo_id in &live {
            set_duplicate_flag(conn, photo_id, false)?;
        }
        conn.execute(
            "DELETE FROM duplicate_groups WHERE id = ?1",
            params![group_id],
        )?;
        debug!("Removed group {} with {} live members", group_id, live.len());
        return Ok(GroupRefresh::Removed);
    }

    let current_keep: Option<String> = conn.query_row(
        "SELECT recommended_keep_id FROM duplicate_groups WHERE id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    let keep_is_live = current_keep
        .as_ref()
        .is_some_and(|keep| live.iter().any(|id| id == keep));
    if !keep_is_live {
        let replacement = &live[0];
        set_recommended_keep(conn, group_id, Some(replacement.as_str()))?;
        set_duplicate_flag(conn, replacement, false)?;
    }

    recompute_aggregates(conn, group_id)?;
    Ok(GroupRefresh::Updated {
        member_count: live.len() as u32,
    })
}

/// Persistent duplicate groups and their memberships. Every multi-row
/// mutation runs in one transaction and leaves count and size recomputed.
pub struct GroupRepository<'a> {
    conn: &'a Connection,
}

impl Repository for GroupRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> GroupRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a group and flag every member except the recommended keep.
    pub fn create_group(
        &self,
        group_key: &str,
        member_ids: &[String],
        recommended_keep_id: &str,
    ) -> Result<String, DatabaseError> {
        let tx = self.transaction()?;
        let id = insert_group(&tx, group_key, member_ids, recommended_keep_id)?;
        tx.commit()?;

        debug!(
            "Created group {} ({}) with {} members",
            id,
            group_key,
            member_ids.len()
        );
        Ok(id)
    }

    /// Append the ids that are not yet members. Running the same merge twice
    /// adds nothing the second time. A strictly larger newcomer takes over
    /// the keep recommendation and the previous keep is flagged.
    pub fn merge_into_group(
        &self,
        group_id: &str,
        photo_ids: &[String],
    ) -> Result<MergeOutcome, DatabaseError> {
        let tx = self.transaction()?;
        let outcome = merge_members(&tx, group_id, photo_ids)?;
        tx.commit()?;

        if !outcome.added.is_empty() {
            debug!(
                "Merged {} new members into group {}",
                outcome.added.len(),
                group_id
            );
        }
        Ok(outcome)
    }

    /// Store one cluster so that each of its photos ends up in exactly one
    /// group. The target is the group holding `group_key`, else the oldest
    /// group holding any member, else a new group. Members held by any other
    /// group are moved into the target and the groups they leave are
    /// repaired, all in one transaction.
    pub fn write_cluster(
        &self,
        group_key: &str,
        member_ids: &[String],
        recommended_keep_id: &str,
    ) -> Result<ClusterWrite, DatabaseError> {
        let tx = self.transaction()?;

        let holders = group_ids_holding(&tx, member_ids)?;
        let target = match group_id_by_key(&tx, group_key)? {
            Some(id) => Some(id),
            None => holders.first().cloned(),
        };

        let Some(target) = target else {
            let group_id = insert_group(&tx, group_key, member_ids, recommended_keep_id)?;
            tx.commit()?;
            return Ok(ClusterWrite {
                group_id,
                created: true,
                outcome: MergeOutcome {
                    added: member_ids.to_vec(),
                    recommended_keep_id: Some(recommended_keep_id.to_string()),
                },
                detached: Vec::new(),
            });
        };

        let mut detached = Vec::new();
        for other in holders.iter().filter(|id| **id != target) {
            let sql = format!(
                "DELETE FROM group_photos WHERE group_id = ?1 AND photo_id IN ({})",
                placeholders(member_ids.len(), 1)
            );
            let values = std::iter::once(other.as_str()).chain(member_ids.iter().map(String::as_str));
            tx.execute(&sql, params_from_iter(values))?;
            detached.push((other.clone(), repair_group(&tx, other)?));
        }

        let outcome = merge_members(&tx, &target, member_ids)?;
        tx.commit()?;

        Ok(ClusterWrite {
            group_id: target,
            created: false,
            outcome,
            detached,
        })
    }

    pub fn find_by_key(&self, group_key: &str) -> Result<Option<Group>, DatabaseError> {
        match group_id_by_key(self.conn, group_key)? {
            Some(id) => self.find_by_id(&id),
            None => Ok(None),
        }
    }

    pub fn find_by_id(&self, group_id: &str) -> Result<Option<Group>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM duplicate_groups g WHERE g.id = ?1",
            GROUP_COLUMNS
        );
        let group = self
            .conn
            .query_row(&sql, params![group_id], group_from_row)
            .optional()?;

        match group {
            Some(mut group) => {
                group.members = self.live_members(&group)?;
                Ok(Some(group))
            }
            None => Ok(None),
        }
    }

    /// All groups with live members joined in.
    pub fn get_all_groups(&self) -> Result<Vec<Group>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM duplicate_groups g ORDER BY g.rowid",
            GROUP_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let groups = stmt
            .query_map([], group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        groups
            .into_iter()
            .map(|mut group| {
                group.members = self.live_members(&group)?;
                Ok::<_, DatabaseError>(group)
            })
            .collect()
    }

    fn live_members(&self, group: &Group) -> Result<Vec<GroupMember>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM group_photos gp
             JOIN photos p ON p.library_id = gp.photo_id
             WHERE gp.group_id = ?1 AND p.is_deleted = 0
             ORDER BY (p.library_id = ?2) DESC, p.quality_score DESC, p.size DESC, p.rowid ASC",
            PHOTO_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![group.id, group.recommended_keep_id], photo_from_row)?;

        rows.map(|row| {
            let photo = row?;
            let is_recommended = group.recommended_keep_id.as_deref() == Some(&photo.library_id);
            Ok::<_, DatabaseError>(GroupMember {
                photo,
                is_recommended,
            })
        })
        .collect()
    }

    /// Every membership row, deleted photos included.
    pub fn member_ids(&self, group_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT photo_id FROM group_photos WHERE group_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// User feedback "not a duplicate": drop the group and its memberships
    /// and clear the members' duplicate flags.
    pub fn reject_group(&self, group_id: &str) -> Result<bool, DatabaseError> {
        let tx = self.transaction()?;
        tx.execute(
            "UPDATE photos SET is_duplicate = 0, updated_at = ?2
             WHERE library_id IN (SELECT photo_id FROM group_photos WHERE group_id = ?1)",
            params![group_id, now()],
        )?;
        let deleted = tx.execute(
            "DELETE FROM duplicate_groups WHERE id = ?1",
            params![group_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Reset before a fresh full analysis.
    pub fn clear_all_groups(&self) -> Result<usize, DatabaseError> {
        let tx = self.transaction()?;
        tx.execute(
            "UPDATE photos SET is_duplicate = 0, updated_at = ?1 WHERE is_duplicate = 1",
            params![now()],
        )?;
        tx.execute("DELETE FROM group_photos", [])?;
        let deleted = tx.execute("DELETE FROM duplicate_groups", [])?;
        tx.commit()?;
        debug!("Cleared {} groups", deleted);
        Ok(deleted)
    }

    /// Soft-delete `photo_ids` and repair every group that holds any of
    /// them. Returns each repaired group with its state afterwards.
    pub fn remove_deleted_members(
        &self,
        photo_ids: &[String],
    ) -> Result<Vec<(String, GroupRefresh)>, DatabaseError> {
        let tx = self.transaction()?;
        let holders = group_ids_holding(&tx, photo_ids)?;
        soft_delete_in(&tx, photo_ids)?;

        let mut refreshed = Vec::with_capacity(holders.len());
        for group_id in holders {
            let refresh = repair_group(&tx, &group_id)?;
            refreshed.push((group_id, refresh));
        }
        tx.commit()?;
        Ok(refreshed)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM duplicate_groups", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Photo;
    use crate::database::Database;

    fn setup_test_db(sizes: &[u64]) -> (Database, Vec<String>) {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let id = format!("pho_{}", i + 1);
            db.photos()
                .upsert(&Photo::new(&id, format!("/test/image{}.jpg", i + 1), *size))
                .unwrap();
            ids.push(id);
        }
        (db, ids)
    }

    fn flag(db: &Database, id: &str) -> bool {
        db.photos().find_by_id(id).unwrap().is_duplicate
    }

    #[test]
    fn test_create_group() {
        let (db, ids) = setup_test_db(&[3000, 1000, 500]);
        let repo = db.groups();

        let group_id = repo.create_group("key1", &ids, &ids[0]).unwrap();
        assert!(group_id.starts_with("grp_"));

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.member_count, 3);
        assert_eq!(group.total_size, 4500);
        assert_eq!(group.recommended_keep_id.as_deref(), Some("pho_1"));
        assert_eq!(group.members[0].photo.library_id, "pho_1");
        assert!(group.members[0].is_recommended);

        assert!(!flag(&db, "pho_1"));
        assert!(flag(&db, "pho_2"));
        assert!(flag(&db, "pho_3"));
    }

    #[test]
    fn test_group_key_is_unique() {
        let (db, ids) = setup_test_db(&[10, 20]);
        let repo = db.groups();

        repo.create_group("same", &ids, &ids[1]).unwrap();
        let second = repo.create_group("same", &ids, &ids[1]);
        assert!(matches!(second, Err(DatabaseError::Query(_))));
        // The failed transaction left nothing behind
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (db, ids) = setup_test_db(&[3000, 1000, 500]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids[..2], &ids[0]).unwrap();

        let outcome = repo.merge_into_group(&group_id, &ids).unwrap();
        assert_eq!(outcome.added, vec!["pho_3".to_string()]);
        assert!(flag(&db, "pho_3"));

        let again = repo.merge_into_group(&group_id, &ids).unwrap();
        assert!(again.added.is_empty());

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.member_count, 3);
        assert_eq!(group.total_size, 4500);
        assert_eq!(repo.member_ids(&group_id).unwrap().len(), 3);
    }

    #[test]
    fn test_merge_larger_member_takes_keep() {
        let (db, ids) = setup_test_db(&[1000, 500, 8000]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids[..2], &ids[0]).unwrap();

        let outcome = repo
            .merge_into_group(&group_id, &[ids[2].clone()])
            .unwrap();
        assert_eq!(outcome.recommended_keep_id.as_deref(), Some("pho_3"));

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.recommended_keep().unwrap().library_id, "pho_3");
        assert!(flag(&db, "pho_1"));
        assert!(!flag(&db, "pho_3"));
    }

    #[test]
    fn test_merge_unknown_group() {
        let (db, ids) = setup_test_db(&[1]);
        let result = db.groups().merge_into_group("grp_missing", &ids);
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[test]
    fn test_find_by_key() {
        let (db, ids) = setup_test_db(&[1, 2]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids, &ids[1]).unwrap();

        let group = repo.find_by_key("key1").unwrap().unwrap();
        assert_eq!(group.id, group_id);
        assert_eq!(group.members.len(), 2);
        assert!(repo.find_by_key("key2").unwrap().is_none());
    }

    #[test]
    fn test_write_cluster_creates_then_merges() {
        let (db, ids) = setup_test_db(&[3000, 1000, 500]);
        let repo = db.groups();

        let first = repo.write_cluster("key1", &ids[..2], &ids[0]).unwrap();
        assert!(first.created);
        assert_eq!(first.outcome.recommended_keep_id.as_deref(), Some("pho_1"));

        let second = repo.write_cluster("key1", &ids, &ids[0]).unwrap();
        assert!(!second.created);
        assert_eq!(second.group_id, first.group_id);
        assert_eq!(second.outcome.added, vec!["pho_3".to_string()]);
        assert!(second.detached.is_empty());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_write_cluster_joins_group_of_a_member() {
        let (db, ids) = setup_test_db(&[10, 20, 30]);
        let repo = db.groups();
        let group_id = repo.create_group("old", &ids[..2], &ids[1]).unwrap();

        let write = repo.write_cluster("new", &ids[1..], &ids[2]).unwrap();
        assert_eq!(write.group_id, group_id);
        assert_eq!(repo.count().unwrap(), 1);

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.member_count, 3);
        assert_eq!(group.recommended_keep_id.as_deref(), Some("pho_3"));
        assert!(flag(&db, "pho_2"));
        assert!(!flag(&db, "pho_3"));
    }

    #[test]
    fn test_write_cluster_moves_members_out_of_other_groups() {
        let (db, ids) = setup_test_db(&[40, 30, 20, 10, 5]);
        let repo = db.groups();
        let keyed = repo.create_group("k0", &ids[..2], &ids[0]).unwrap();
        // pho_3 is the keep here and pho_5 stays behind
        let other = repo
            .create_group("k7", &[ids[2].clone(), ids[3].clone(), ids[4].clone()], &ids[2])
            .unwrap();

        let members = ids[..4].to_vec();
        let write = repo.write_cluster("k0", &members, &ids[0]).unwrap();
        assert_eq!(write.group_id, keyed);
        assert_eq!(write.detached, vec![(other.clone(), GroupRefresh::Removed)]);

        let groups = repo.get_all_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_count, 4);
        assert_eq!(groups[0].total_size, 100);
        assert!(repo.member_ids(&other).unwrap().is_empty());

        // The moved keep is a duplicate now, the one left behind is not
        assert!(flag(&db, "pho_3"));
        assert!(flag(&db, "pho_4"));
        assert!(!flag(&db, "pho_5"));
        assert!(!flag(&db, "pho_1"));
    }

    #[test]
    fn test_write_cluster_leaves_shrunk_group_consistent() {
        let (db, ids) = setup_test_db(&[50, 40, 30, 20, 10]);
        let repo = db.groups();
        let keyed = repo.create_group("k0", &ids[..2], &ids[0]).unwrap();
        let other = repo.create_group("k9", &ids[2..], &ids[2]).unwrap();

        let write = repo
            .write_cluster("k0", &[ids[0].clone(), ids[2].clone()], &ids[0])
            .unwrap();
        assert_eq!(
            write.detached,
            vec![(other.clone(), GroupRefresh::Updated { member_count: 2 })]
        );

        let shrunk = repo.find_by_id(&other).unwrap().unwrap();
        assert_eq!(shrunk.member_count, 2);
        assert_eq!(shrunk.total_size, 30);
        assert_eq!(shrunk.recommended_keep_id.as_deref(), Some("pho_4"));
        assert!(!flag(&db, "pho_4"));
        assert!(flag(&db, "pho_5"));

        let grown = repo.find_by_id(&keyed).unwrap().unwrap();
        assert_eq!(grown.member_count, 3);
        assert!(flag(&db, "pho_3"));
    }

    #[test]
    fn test_reject_group() {
        let (db, ids) = setup_test_db(&[10, 20, 30]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids, &ids[2]).unwrap();

        assert!(repo.reject_group(&group_id).unwrap());
        assert!(repo.find_by_id(&group_id).unwrap().is_none());
        assert!(repo.get_all_groups().unwrap().is_empty());
        assert!(repo.member_ids(&group_id).unwrap().is_empty());
        for id in &ids {
            assert!(!flag(&db, id));
        }

        assert!(!repo.reject_group(&group_id).unwrap());
    }

    #[test]
    fn test_clear_all_groups() {
        let (db, ids) = setup_test_db(&[10, 20, 30, 40]);
        let repo = db.groups();
        repo.create_group("key1", &ids[..2], &ids[1]).unwrap();
        repo.create_group("key2", &ids[2..], &ids[3]).unwrap();
        assert_eq!(db.photos().count_duplicates().unwrap(), 2);

        assert_eq!(repo.clear_all_groups().unwrap(), 2);
        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(db.photos().count_duplicates().unwrap(), 0);
    }

    #[test]
    fn test_remove_deleted_members_updates_group() {
        let (db, ids) = setup_test_db(&[3000, 1000, 500]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids, &ids[0]).unwrap();

        let refreshed = repo.remove_deleted_members(&[ids[2].clone()]).unwrap();
        assert_eq!(
            refreshed,
            vec![(group_id.clone(), GroupRefresh::Updated { member_count: 2 })]
        );

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.member_count, 2);
        assert_eq!(group.total_size, 4000);
        assert!(!group.contains("pho_3"));
    }

    #[test]
    fn test_remove_keep_picks_replacement() {
        let (db, ids) = setup_test_db(&[3000, 1000, 500]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids, &ids[0]).unwrap();

        repo.remove_deleted_members(&[ids[0].clone()]).unwrap();

        let group = repo.find_by_id(&group_id).unwrap().unwrap();
        assert_eq!(group.recommended_keep_id.as_deref(), Some("pho_2"));
        assert!(!flag(&db, "pho_2"));
        assert_eq!(group.potential_savings(), 500);
    }

    #[test]
    fn test_group_removed_when_one_member_left() {
        let (db, ids) = setup_test_db(&[3000, 1000]);
        let repo = db.groups();
        let group_id = repo.create_group("key1", &ids, &ids[0]).unwrap();

        let refreshed = repo.remove_deleted_members(&[ids[1].clone()]).unwrap();
        assert_eq!(refreshed, vec![(group_id.clone(), GroupRefresh::Removed)]);
        assert!(repo.find_by_id(&group_id).unwrap().is_none());
        assert!(!flag(&db, "pho_1"));
        assert!(db.photos().find_by_id("pho_2").unwrap().is_deleted);
    }

    #[test]
    fn test_remove_deleted_members_repairs_every_holding_group() {
        let (db, ids) = setup_test_db(&[30, 20, 10]);
        let repo = db.groups();
        // Built directly so one photo sits in two groups
        let first = repo.create_group("k1", &ids[..2], &ids[0]).unwrap();
        let second = repo.create_group("k2", &ids[1..], &ids[1]).unwrap();

        let refreshed = repo.remove_deleted_members(&[ids[1].clone()]).unwrap();
        assert_eq!(
            refreshed,
            vec![
                (first, GroupRefresh::Removed),
                (second, GroupRefresh::Removed),
            ]
        );
        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(db.photos().count_duplicates().unwrap(), 0);
    }

    #[test]
    fn test_nothing_to_repair_for_ungrouped_photos() {
        let (db, ids) = setup_test_db(&[1]);
        let refreshed = db.groups().remove_deleted_members(&ids).unwrap();
        assert!(refreshed.is_empty());
        assert!(db.photos().find_by_id("pho_1").unwrap().is_deleted);
    }
}
