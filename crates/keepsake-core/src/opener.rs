use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use keepsake_types::events::CapsuleEvent;
use keepsake_types::models::ReadinessState;

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::error::CapsuleError;
use crate::external::{AccessGranter, MembershipService};
use crate::readiness;
use crate::store::CapsuleStore;

const GRANT_RETRIES: u32 = 3;
const GRANT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub capsule_id: Uuid,
    pub group_id: Uuid,
    pub opened_at: DateTime<Utc>,
    /// True when an earlier open was observed instead of this call
    /// performing the transition.
    pub already_opened: bool,
}

/// Executes the open transition for one (capsule, group) pair.
///
/// The store's conditional update is the commit point; everything after it
/// (access grant, event emission) is downstream of an already-durable open.
/// The whole operation is idempotent, so callers may retry freely.
#[derive(Clone)]
pub struct CapsuleOpener {
    inner: Arc<OpenerInner>,
}

struct OpenerInner {
    store: Arc<dyn CapsuleStore>,
    membership: Arc<dyn MembershipService>,
    granter: Arc<dyn AccessGranter>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    call_timeout: Duration,
}

impl CapsuleOpener {
    pub fn new(
        store: Arc<dyn CapsuleStore>,
        membership: Arc<dyn MembershipService>,
        granter: Arc<dyn AccessGranter>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OpenerInner {
                store,
                membership,
                granter,
                clock,
                bus,
                call_timeout,
            }),
        }
    }

    pub async fn open(
        &self,
        capsule_id: Uuid,
        group_id: Uuid,
        actor_id: Uuid,
    ) -> Result<OpenOutcome, CapsuleError> {
        let store = self.inner.store.clone();
        let (capsule, link) =
            tokio::task::spawn_blocking(move || store.get_link(capsule_id, group_id))
                .await
                .map_err(|e| CapsuleError::Storage(anyhow!("lookup task join error: {}", e)))??
                .ok_or(CapsuleError::NotFound("capsule"))?;

        let is_member = tokio::time::timeout(
            self.inner.call_timeout,
            self.inner.membership.is_member(group_id, actor_id),
        )
        .await
        .map_err(|_| CapsuleError::Transient("membership check timed out".into()))?
        .map_err(|e| CapsuleError::Transient(format!("membership check failed: {}", e)))?;

        if !is_member {
            return Err(CapsuleError::Permission);
        }

        let now = self.inner.clock.now();
        match readiness::evaluate(&capsule, &link, now) {
            ReadinessState::Locked => Err(CapsuleError::NotReady {
                remaining: readiness::remaining(&capsule, now),
            }),

            ReadinessState::Opened => {
                let opened_at = link
                    .opened_at
                    .ok_or_else(|| CapsuleError::Storage(anyhow!("opened link has no opened_at")))?;
                Ok(OpenOutcome {
                    capsule_id,
                    group_id,
                    opened_at,
                    already_opened: true,
                })
            }

            ReadinessState::Ready => {
                let store = self.inner.store.clone();
                let (updated, transitioned) =
                    tokio::task::spawn_blocking(move || store.mark_opened(capsule_id, group_id, now))
                        .await
                        .map_err(|e| CapsuleError::Storage(anyhow!("open task join error: {}", e)))??
                        // The capsule was deleted between lookup and commit
                        .ok_or(CapsuleError::NotFound("capsule"))?;

                let opened_at = updated
                    .opened_at
                    .ok_or_else(|| CapsuleError::Storage(anyhow!("opened link has no opened_at")))?;

                if transitioned {
                    self.inner.bus.emit(CapsuleEvent::CapsuleOpened {
                        capsule_id,
                        group_id,
                        actor_id,
                        opened_at,
                    });
                    self.grant_access(&capsule.content_ref, group_id).await;
                }

                Ok(OpenOutcome {
                    capsule_id,
                    group_id,
                    opened_at,
                    already_opened: !transitioned,
                })
            }
        }
    }

    /// Best-effort access grant. The open is already committed; a failed
    /// grant is retried in the background and never surfaces to the caller.
    async fn grant_access(&self, content_ref: &str, group_id: Uuid) {
        let first = tokio::time::timeout(
            self.inner.call_timeout,
            self.inner.granter.grant(content_ref, group_id),
        )
        .await;
        match first {
            Ok(Ok(())) => return,
            Ok(Err(e)) => warn!("Access grant for {} failed: {}", content_ref, e),
            Err(_) => warn!("Access grant for {} timed out", content_ref),
        }

        let inner = self.inner.clone();
        let content_ref = content_ref.to_string();
        tokio::spawn(async move {
            for attempt in 1..=GRANT_RETRIES {
                tokio::time::sleep(GRANT_RETRY_DELAY * attempt).await;
                let result = tokio::time::timeout(
                    inner.call_timeout,
                    inner.granter.grant(&content_ref, group_id),
                )
                .await;
                match result {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => {
                        warn!("Access grant retry {} for {} failed: {}", attempt, content_ref, e)
                    }
                    Err(_) => warn!("Access grant retry {} for {} timed out", attempt, content_ref),
                }
            }
            error!("Giving up on access grant for {} group {}", content_ref, group_id);
        });
    }
}
