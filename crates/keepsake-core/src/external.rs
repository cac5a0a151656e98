use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use keepsake_db::Database;

/// Answers "is this user currently a member of this group". In production
/// this may be a remote service; callers treat it as I/O-bound and wrap it
/// in a timeout.
#[async_trait]
pub trait MembershipService: Send + Sync {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool>;
}

/// Makes previously locked content visible to a group. Must be idempotent:
/// granting the same (content_ref, group) twice is a no-op.
#[async_trait]
pub trait AccessGranter: Send + Sync {
    async fn grant(&self, content_ref: &str, group_id: Uuid) -> Result<()>;
}

/// Membership backed by the local `group_members` table.
pub struct SqliteMembership {
    db: Arc<Database>,
}

impl SqliteMembership {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipService for SqliteMembership {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.is_group_member(&group_id.to_string(), &user_id.to_string())
        })
        .await
        .context("membership task join error")?
    }
}

/// Access grants backed by the local `content_grants` table.
pub struct SqliteGranter {
    db: Arc<Database>,
}

impl SqliteGranter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccessGranter for SqliteGranter {
    async fn grant(&self, content_ref: &str, group_id: Uuid) -> Result<()> {
        let db = self.db.clone();
        let content_ref = content_ref.to_string();
        tokio::task::spawn_blocking(move || {
            db.grant_content(&content_ref, &group_id.to_string())
        })
        .await
        .context("grant task join error")?
    }
}
