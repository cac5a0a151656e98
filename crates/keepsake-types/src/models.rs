use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-locked piece of shared content. The payload itself lives behind
/// `content_ref` — the server never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub category: String,
    pub year: Option<i32>,
    /// Immutable after creation. Rescheduling is delete + recreate.
    pub release_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub content_ref: String,
}

/// Join row between a capsule and one group that may unlock it.
/// Each group tracks its own open state independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupLink {
    pub capsule_id: Uuid,
    pub group_id: Uuid,
    pub is_opened: bool,
    /// Set exactly once, on the false→true transition of `is_opened`.
    pub opened_at: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
}

/// One-shot reminder bookkeeping. At most one row per capsule; re-arming
/// replaces the row and the `handle` identifies the live timer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReminder {
    pub capsule_id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub handle: Uuid,
}

/// Derived per (capsule, link, now) — never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Locked,
    Ready,
    Opened,
}

/// Input to capsule creation, before ids and timestamps are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleDraft {
    pub owner_id: Uuid,
    pub title: String,
    pub category: String,
    pub year: Option<i32>,
    pub release_at: DateTime<Utc>,
    pub content_ref: String,
    pub group_ids: Vec<Uuid>,
}
