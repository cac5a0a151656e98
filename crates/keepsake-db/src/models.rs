use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keepsake_types::models::{Capsule, GroupLink, PendingReminder};

/// Database row types — these map directly to SQLite rows.
/// Distinct from keepsake-types API models to keep the DB layer independent.
pub struct CapsuleRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub category: String,
    pub year: Option<i32>,
    pub release_at: String,
    pub created_at: String,
    pub content_ref: String,
}

pub struct GroupLinkRow {
    pub capsule_id: String,
    pub group_id: String,
    pub is_opened: bool,
    pub opened_at: Option<String>,
    pub scheduled_at: String,
}

pub struct ReminderRow {
    pub capsule_id: String,
    pub fire_at: String,
    pub handle: String,
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("bad uuid in row: {}", s))
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp in row: {}", s))
}

impl CapsuleRow {
    pub fn into_capsule(self) -> Result<Capsule> {
        Ok(Capsule {
            id: parse_uuid(&self.id)?,
            owner_id: parse_uuid(&self.owner_id)?,
            title: self.title,
            category: self.category,
            year: self.year,
            release_at: parse_ts(&self.release_at)?,
            created_at: parse_ts(&self.created_at)?,
            content_ref: self.content_ref,
        })
    }
}

impl GroupLinkRow {
    pub fn into_link(self) -> Result<GroupLink> {
        Ok(GroupLink {
            capsule_id: parse_uuid(&self.capsule_id)?,
            group_id: parse_uuid(&self.group_id)?,
            is_opened: self.is_opened,
            opened_at: self.opened_at.as_deref().map(parse_ts).transpose()?,
            scheduled_at: parse_ts(&self.scheduled_at)?,
        })
    }
}

impl ReminderRow {
    pub fn into_reminder(self) -> Result<PendingReminder> {
        Ok(PendingReminder {
            capsule_id: parse_uuid(&self.capsule_id)?,
            fire_at: parse_ts(&self.fire_at)?,
            handle: parse_uuid(&self.handle)?,
        })
    }
}
