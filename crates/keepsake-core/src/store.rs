use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keepsake_db::Database;
use keepsake_db::models::CapsuleRow;
use keepsake_types::models::{Capsule, GroupLink, PendingReminder};

/// Durable record of capsules, per-group links, and reminder bookkeeping.
///
/// Implementations must make `mark_opened` a single atomic conditional
/// update (compare-and-set on `is_opened` false → true); that is the only
/// synchronization point concurrent open calls rely on. All successful
/// mutations are durable before the call returns.
pub trait CapsuleStore: Send + Sync {
    /// Persist the capsule and one link per group in a single transaction.
    /// Input is assumed validated by the caller; a partial failure leaves
    /// no orphaned rows behind.
    fn insert_capsule(&self, capsule: &Capsule, group_ids: &[Uuid]) -> Result<Vec<GroupLink>>;

    /// Unopened links for a group, ordered by `release_at` ascending, stable.
    fn list_active(&self, group_id: Uuid) -> Result<Vec<(Capsule, GroupLink)>>;

    fn get_link(&self, capsule_id: Uuid, group_id: Uuid) -> Result<Option<(Capsule, GroupLink)>>;

    /// Conditional open. Returns the post-state link plus whether this call
    /// performed the false → true transition; `None` when the pair does not
    /// exist. An already-opened link comes back unchanged with its original
    /// `opened_at`.
    fn mark_opened(
        &self,
        capsule_id: Uuid,
        group_id: Uuid,
        opened_at: DateTime<Utc>,
    ) -> Result<Option<(GroupLink, bool)>>;

    /// Remove the capsule, all its links, and any reminder row. False when
    /// the capsule was absent.
    fn delete_capsule(&self, capsule_id: Uuid) -> Result<bool>;

    /// Groups that still have unopened links.
    fn active_groups(&self) -> Result<Vec<Uuid>>;

    // -- Reminder bookkeeping (at most one row per capsule) --

    fn put_reminder(&self, reminder: &PendingReminder) -> Result<()>;
    fn remove_reminder(&self, capsule_id: Uuid) -> Result<bool>;
    fn list_reminders(&self) -> Result<Vec<PendingReminder>>;
}

// SQLite-backed store. The db layer speaks strings and row structs; this
// impl is the translation boundary to the typed domain model.
impl CapsuleStore for Database {
    fn insert_capsule(&self, capsule: &Capsule, group_ids: &[Uuid]) -> Result<Vec<GroupLink>> {
        let row = CapsuleRow {
            id: capsule.id.to_string(),
            owner_id: capsule.owner_id.to_string(),
            title: capsule.title.clone(),
            category: capsule.category.clone(),
            year: capsule.year,
            release_at: capsule.release_at.to_rfc3339(),
            created_at: capsule.created_at.to_rfc3339(),
            content_ref: capsule.content_ref.clone(),
        };
        let ids: Vec<String> = group_ids.iter().map(Uuid::to_string).collect();

        self.create_capsule(&row, &ids)?;

        Ok(group_ids
            .iter()
            .map(|&group_id| GroupLink {
                capsule_id: capsule.id,
                group_id,
                is_opened: false,
                opened_at: None,
                scheduled_at: capsule.created_at,
            })
            .collect())
    }

    fn list_active(&self, group_id: Uuid) -> Result<Vec<(Capsule, GroupLink)>> {
        self.list_active_links(&group_id.to_string())?
            .into_iter()
            .map(|(c, l)| Ok((c.into_capsule()?, l.into_link()?)))
            .collect()
    }

    fn get_link(&self, capsule_id: Uuid, group_id: Uuid) -> Result<Option<(Capsule, GroupLink)>> {
        self.get_capsule_link(&capsule_id.to_string(), &group_id.to_string())?
            .map(|(c, l)| Ok((c.into_capsule()?, l.into_link()?)))
            .transpose()
    }

    fn mark_opened(
        &self,
        capsule_id: Uuid,
        group_id: Uuid,
        opened_at: DateTime<Utc>,
    ) -> Result<Option<(GroupLink, bool)>> {
        self.mark_link_opened(
            &capsule_id.to_string(),
            &group_id.to_string(),
            &opened_at.to_rfc3339(),
        )?
        .map(|(row, transitioned)| Ok((row.into_link()?, transitioned)))
        .transpose()
    }

    fn delete_capsule(&self, capsule_id: Uuid) -> Result<bool> {
        Database::delete_capsule(self, &capsule_id.to_string())
    }

    fn active_groups(&self) -> Result<Vec<Uuid>> {
        self.active_group_ids()?
            .iter()
            .map(|id| Uuid::parse_str(id).map_err(|e| anyhow!("bad group id in db: {}", e)))
            .collect()
    }

    fn put_reminder(&self, reminder: &PendingReminder) -> Result<()> {
        self.upsert_reminder(
            &reminder.capsule_id.to_string(),
            &reminder.fire_at.to_rfc3339(),
            &reminder.handle.to_string(),
        )
    }

    fn remove_reminder(&self, capsule_id: Uuid) -> Result<bool> {
        self.delete_reminder(&capsule_id.to_string())
    }

    fn list_reminders(&self) -> Result<Vec<PendingReminder>> {
        Database::list_reminders(self)?
            .into_iter()
            .map(|row| row.into_reminder())
            .collect()
    }
}
