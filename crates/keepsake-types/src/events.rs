use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted on the capsule event bus and streamed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CapsuleEvent {
    /// A scheduled reminder reached its fire time. Emitted at most once
    /// per arm call.
    ReminderFired {
        capsule_id: Uuid,
        fire_at: DateTime<Utc>,
    },

    /// A tracked (capsule, group) pair crossed Locked → Ready. Emitted
    /// exactly once per transition.
    BecameReady {
        capsule_id: Uuid,
        group_id: Uuid,
        release_at: DateTime<Utc>,
    },

    /// A group opened the capsule. Emitted only for the winning transition,
    /// not for idempotent re-opens.
    CapsuleOpened {
        capsule_id: Uuid,
        group_id: Uuid,
        actor_id: Uuid,
        opened_at: DateTime<Utc>,
    },

    /// The capsule and all its links were removed.
    CapsuleDeleted { capsule_id: Uuid },
}

impl CapsuleEvent {
    /// Returns the group_id if this event is scoped to a single group.
    /// `None` means the event concerns the capsule as a whole.
    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::BecameReady { group_id, .. } => Some(*group_id),
            Self::CapsuleOpened { group_id, .. } => Some(*group_id),
            Self::ReminderFired { .. } | Self::CapsuleDeleted { .. } => None,
        }
    }

    pub fn capsule_id(&self) -> Uuid {
        match self {
            Self::ReminderFired { capsule_id, .. }
            | Self::BecameReady { capsule_id, .. }
            | Self::CapsuleOpened { capsule_id, .. }
            | Self::CapsuleDeleted { capsule_id } => *capsule_id,
        }
    }
}
