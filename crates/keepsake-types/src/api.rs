use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ReadinessState;

// -- Capsules --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCapsuleRequest {
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub category: String,
    pub year: Option<i32>,
    pub release_at: DateTime<Utc>,
    pub content_ref: String,
    pub group_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CapsuleResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub category: String,
    pub year: Option<i32>,
    pub release_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub content_ref: String,
    pub group_ids: Vec<Uuid>,
}

/// One (capsule, link) entry in a group's active list, with readiness
/// computed at response time so clients can render countdowns directly.
#[derive(Debug, Serialize)]
pub struct GroupCapsuleResponse {
    pub capsule_id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub category: String,
    pub year: Option<i32>,
    pub release_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub readiness: ReadinessState,
    /// Seconds until release; 0 once ready or opened.
    pub remaining_secs: u64,
}

// -- Open --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenCapsuleRequest {
    pub group_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OpenCapsuleResponse {
    pub capsule_id: Uuid,
    pub group_id: Uuid,
    pub opened_at: DateTime<Utc>,
    /// True when this call observed an earlier open instead of performing
    /// the transition itself.
    pub already_opened: bool,
}

// -- Membership --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

// -- Errors --

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}
