use crate::Database;
use crate::models::{CapsuleRow, GroupLinkRow, ReminderRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Capsules --

    /// Insert a capsule and all of its group links in one transaction.
    /// A partial failure rolls everything back — a capsule row never exists
    /// without its links, and vice versa.
    pub fn create_capsule(&self, capsule: &CapsuleRow, group_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO capsules (id, owner_id, title, category, year, release_at, created_at, content_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    capsule.id,
                    capsule.owner_id,
                    capsule.title,
                    capsule.category,
                    capsule.year,
                    capsule.release_at,
                    capsule.created_at,
                    capsule.content_ref,
                ],
            )?;

            for group_id in group_ids {
                tx.execute(
                    "INSERT INTO group_links (capsule_id, group_id, is_opened, opened_at, scheduled_at)
                     VALUES (?1, ?2, 0, NULL, ?3)",
                    rusqlite::params![capsule.id, group_id, capsule.created_at],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// All unopened links for a group, nearest release first. Ties break on
    /// capsule id so the ordering is stable across calls.
    pub fn list_active_links(&self, group_id: &str) -> Result<Vec<(CapsuleRow, GroupLinkRow)>> {
        self.with_conn(|conn| query_active_links(conn, group_id))
    }

    pub fn get_capsule_link(
        &self,
        capsule_id: &str,
        group_id: &str,
    ) -> Result<Option<(CapsuleRow, GroupLinkRow)>> {
        self.with_conn(|conn| query_capsule_link(conn, capsule_id, group_id))
    }

    /// Atomic conditional open: flips `is_opened` 0 → 1 and records
    /// `opened_at` only on the winning transition. Concurrent callers all
    /// read back the same row afterwards, so losers observe the winner's
    /// `opened_at` instead of an error. The returned bool is true only for
    /// the call that performed the transition.
    pub fn mark_link_opened(
        &self,
        capsule_id: &str,
        group_id: &str,
        opened_at: &str,
    ) -> Result<Option<(GroupLinkRow, bool)>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE group_links SET is_opened = 1, opened_at = ?3
                 WHERE capsule_id = ?1 AND group_id = ?2 AND is_opened = 0",
                rusqlite::params![capsule_id, group_id, opened_at],
            )?;

            Ok(query_link(conn, capsule_id, group_id)?.map(|row| (row, changed > 0)))
        })
    }

    /// Remove the capsule, its links, and any pending reminder row.
    /// Returns false if the capsule did not exist.
    pub fn delete_capsule(&self, capsule_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM pending_reminders WHERE capsule_id = ?1",
                [capsule_id],
            )?;
            tx.execute(
                "DELETE FROM group_links WHERE capsule_id = ?1",
                [capsule_id],
            )?;
            let deleted = tx.execute("DELETE FROM capsules WHERE id = ?1", [capsule_id])?;

            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    /// Distinct groups that still have unopened links — the working set a
    /// fresh process needs to track.
    pub fn active_group_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT group_id FROM group_links WHERE is_opened = 0")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Reminders --

    /// Replace-on-write: a capsule has at most one reminder row, and arming
    /// again overwrites the previous generation.
    pub fn upsert_reminder(&self, capsule_id: &str, fire_at: &str, handle: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO pending_reminders (capsule_id, fire_at, handle)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(capsule_id) DO UPDATE SET fire_at = ?2, handle = ?3",
                rusqlite::params![capsule_id, fire_at, handle],
            )?;
            Ok(())
        })
    }

    pub fn delete_reminder(&self, capsule_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM pending_reminders WHERE capsule_id = ?1",
                [capsule_id],
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn get_reminder(&self, capsule_id: &str) -> Result<Option<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT capsule_id, fire_at, handle FROM pending_reminders WHERE capsule_id = ?1",
            )?;
            let row = stmt
                .query_row([capsule_id], |row| {
                    Ok(ReminderRow {
                        capsule_id: row.get(0)?,
                        fire_at: row.get(1)?,
                        handle: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_reminders(&self) -> Result<Vec<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT capsule_id, fire_at, handle FROM pending_reminders")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ReminderRow {
                        capsule_id: row.get(0)?,
                        fire_at: row.get(1)?,
                        handle: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Membership --

    pub fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                [group_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    [group_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Content grants --

    /// Idempotent: granting the same (content_ref, group) twice is a no-op.
    pub fn grant_content(&self, content_ref: &str, group_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO content_grants (content_ref, group_id) VALUES (?1, ?2)",
                [content_ref, group_id],
            )?;
            Ok(())
        })
    }

    pub fn has_content_grant(&self, content_ref: &str, group_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM content_grants WHERE content_ref = ?1 AND group_id = ?2",
                    [content_ref, group_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn query_active_links(conn: &Connection, group_id: &str) -> Result<Vec<(CapsuleRow, GroupLinkRow)>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.owner_id, c.title, c.category, c.year, c.release_at, c.created_at, c.content_ref,
                l.capsule_id, l.group_id, l.is_opened, l.opened_at, l.scheduled_at
         FROM group_links l
         JOIN capsules c ON c.id = l.capsule_id
         WHERE l.group_id = ?1 AND l.is_opened = 0
         ORDER BY c.release_at ASC, c.id ASC",
    )?;

    let rows = stmt
        .query_map([group_id], |row| Ok((capsule_from_row(row)?, link_from_row(row, 8)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_capsule_link(
    conn: &Connection,
    capsule_id: &str,
    group_id: &str,
) -> Result<Option<(CapsuleRow, GroupLinkRow)>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.owner_id, c.title, c.category, c.year, c.release_at, c.created_at, c.content_ref,
                l.capsule_id, l.group_id, l.is_opened, l.opened_at, l.scheduled_at
         FROM group_links l
         JOIN capsules c ON c.id = l.capsule_id
         WHERE l.capsule_id = ?1 AND l.group_id = ?2",
    )?;

    let row = stmt
        .query_row([capsule_id, group_id], |row| {
            Ok((capsule_from_row(row)?, link_from_row(row, 8)?))
        })
        .optional()?;

    Ok(row)
}

fn query_link(
    conn: &Connection,
    capsule_id: &str,
    group_id: &str,
) -> Result<Option<GroupLinkRow>> {
    let mut stmt = conn.prepare(
        "SELECT capsule_id, group_id, is_opened, opened_at, scheduled_at
         FROM group_links
         WHERE capsule_id = ?1 AND group_id = ?2",
    )?;

    let row = stmt
        .query_row([capsule_id, group_id], |row| link_from_row(row, 0))
        .optional()?;

    Ok(row)
}

fn capsule_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<CapsuleRow, rusqlite::Error> {
    Ok(CapsuleRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        year: row.get(4)?,
        release_at: row.get(5)?,
        created_at: row.get(6)?,
        content_ref: row.get(7)?,
    })
}

fn link_from_row(
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> std::result::Result<GroupLinkRow, rusqlite::Error> {
    Ok(GroupLinkRow {
        capsule_id: row.get(offset)?,
        group_id: row.get(offset + 1)?,
        is_opened: row.get::<_, i64>(offset + 2)? != 0,
        opened_at: row.get(offset + 3)?,
        scheduled_at: row.get(offset + 4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
