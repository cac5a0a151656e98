use chrono::{DateTime, Duration, Utc};

use keepsake_types::models::{Capsule, GroupLink, ReadinessState};

/// Pure readiness rule. Opened wins over everything; the release boundary
/// is inclusive (`now == release_at` is already Ready).
pub fn evaluate(capsule: &Capsule, link: &GroupLink, now: DateTime<Utc>) -> ReadinessState {
    if link.is_opened {
        ReadinessState::Opened
    } else if now >= capsule.release_at {
        ReadinessState::Ready
    } else {
        ReadinessState::Locked
    }
}

/// Time left until release, clamped to zero once past. Used for countdown
/// display and for the `NotReady` error payload.
pub fn remaining(capsule: &Capsule, now: DateTime<Utc>) -> Duration {
    (capsule.release_at - now).max(Duration::zero())
}
