use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use keepsake_types::events::CapsuleEvent;
use keepsake_types::models::{Capsule, CapsuleDraft, GroupLink, ReadinessState};

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::error::CapsuleError;
use crate::readiness;
use crate::reminders::ReminderScheduler;
use crate::store::CapsuleStore;

struct TrackedPair {
    release_at: DateTime<Utc>,
    last: ReadinessState,
}

/// Owns the working set of not-yet-opened (capsule, group) pairs and drives
/// readiness transitions.
///
/// The sweep works off cached release times plus open/delete events from the
/// bus, so a tick never blocks on the store. `BecameReady` is emitted exactly
/// once per Locked → Ready edge; the last-known-state cache deduplicates
/// across ticks.
#[derive(Clone)]
pub struct CapsuleScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn CapsuleStore>,
    reminders: ReminderScheduler,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    tracked: Mutex<HashMap<(Uuid, Uuid), TrackedPair>>,
    tick_interval: Duration,
}

impl CapsuleScheduler {
    pub fn new(
        store: Arc<dyn CapsuleStore>,
        reminders: ReminderScheduler,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                reminders,
                clock,
                bus,
                tracked: Mutex::new(HashMap::new()),
                tick_interval,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CapsuleEvent> {
        self.inner.bus.subscribe()
    }

    /// Create a capsule fanned out to `draft.group_ids`, register every pair
    /// for tracking, and arm the release reminder. The reminder is a
    /// convenience: if arming fails the capsule still exists and can be
    /// opened manually.
    pub async fn create(
        &self,
        draft: CapsuleDraft,
    ) -> Result<(Capsule, Vec<GroupLink>), CapsuleError> {
        if draft.group_ids.is_empty() {
            return Err(CapsuleError::Validation(
                "at least one group is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        if !draft.group_ids.iter().all(|g| seen.insert(*g)) {
            return Err(CapsuleError::Validation("duplicate group id".into()));
        }

        let now = self.inner.clock.now();
        if draft.release_at <= now {
            return Err(CapsuleError::Validation(
                "release_at must be in the future".into(),
            ));
        }

        let capsule = Capsule {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            title: draft.title,
            category: draft.category,
            year: draft.year,
            release_at: draft.release_at,
            created_at: now,
            content_ref: draft.content_ref,
        };

        let store = self.inner.store.clone();
        let to_insert = capsule.clone();
        let group_ids = draft.group_ids;
        let links = tokio::task::spawn_blocking(move || store.insert_capsule(&to_insert, &group_ids))
            .await
            .map_err(|e| CapsuleError::Storage(anyhow!("create task join error: {}", e)))??;

        {
            let mut tracked = self.inner.tracked.lock().unwrap();
            for link in &links {
                tracked.insert(
                    (capsule.id, link.group_id),
                    TrackedPair {
                        release_at: capsule.release_at,
                        last: ReadinessState::Locked,
                    },
                );
            }
        }

        if let Err(e) = self.inner.reminders.arm(capsule.id, capsule.release_at).await {
            warn!(
                "Reminder not armed for capsule {}: {} (manual open still works)",
                capsule.id, e
            );
        }

        Ok((capsule, links))
    }

    /// Delete the capsule: remove rows, cancel the reminder, drop tracking.
    pub async fn delete(&self, capsule_id: Uuid) -> Result<(), CapsuleError> {
        let store = self.inner.store.clone();
        let deleted = tokio::task::spawn_blocking(move || store.delete_capsule(capsule_id))
            .await
            .map_err(|e| CapsuleError::Storage(anyhow!("delete task join error: {}", e)))??;

        if !deleted {
            return Err(CapsuleError::NotFound("capsule"));
        }

        if let Err(e) = self.inner.reminders.cancel(capsule_id).await {
            warn!("Failed to cancel reminder for {}: {}", capsule_id, e);
        }

        self.inner
            .tracked
            .lock()
            .unwrap()
            .retain(|(cid, _), _| *cid != capsule_id);

        self.inner
            .bus
            .emit(CapsuleEvent::CapsuleDeleted { capsule_id });

        Ok(())
    }

    /// Load a group's unopened links into the tracked set. Pairs that are
    /// already Ready at load time start in Ready, so they do not produce a
    /// late `BecameReady` for a transition that happened while no process
    /// was watching — the reminder path covers those.
    pub async fn track_group(&self, group_id: Uuid) -> Result<usize, CapsuleError> {
        let store = self.inner.store.clone();
        let rows = tokio::task::spawn_blocking(move || store.list_active(group_id))
            .await
            .map_err(|e| CapsuleError::Storage(anyhow!("track task join error: {}", e)))??;

        let now = self.inner.clock.now();
        let count = rows.len();
        let mut tracked = self.inner.tracked.lock().unwrap();
        for (capsule, link) in rows {
            tracked
                .entry((capsule.id, link.group_id))
                .or_insert_with(|| TrackedPair {
                    release_at: capsule.release_at,
                    last: readiness::evaluate(&capsule, &link, now),
                });
        }
        Ok(count)
    }

    /// Startup reconciliation: rebuild the tracked set from the store and
    /// re-arm any persisted reminder without a live timer. Store failures
    /// here are logged and left for the next boot or sweep; they do not
    /// prevent the process from serving.
    pub async fn reconcile(&self) -> Result<(), CapsuleError> {
        let store = self.inner.store.clone();
        let groups = tokio::task::spawn_blocking(move || store.active_groups())
            .await
            .map_err(|e| CapsuleError::Storage(anyhow!("reconcile task join error: {}", e)))??;

        for group_id in groups {
            match self.track_group(group_id).await {
                Ok(count) => info!("Tracking {} active capsules for group {}", count, group_id),
                Err(e) if e.is_transient() => {
                    warn!("Skipping group {} during reconcile: {}", group_id, e)
                }
                Err(e) => return Err(e),
            }
        }

        match self.inner.reminders.rearm_from_store().await {
            Ok(0) => {}
            Ok(n) => info!("Re-armed {} persisted reminders", n),
            Err(e) => warn!("Reminder re-arm failed: {}", e),
        }

        Ok(())
    }

    /// One readiness sweep. Emits `BecameReady` for every pair crossing the
    /// release boundary since the last sweep.
    pub fn tick(&self) {
        let now = self.inner.clock.now();
        let mut became_ready = Vec::new();

        {
            let mut tracked = self.inner.tracked.lock().unwrap();
            for ((capsule_id, group_id), pair) in tracked.iter_mut() {
                if pair.last == ReadinessState::Locked && now >= pair.release_at {
                    pair.last = ReadinessState::Ready;
                    became_ready.push(CapsuleEvent::BecameReady {
                        capsule_id: *capsule_id,
                        group_id: *group_id,
                        release_at: pair.release_at,
                    });
                }
            }
        }

        for event in became_ready {
            self.inner.bus.emit(event);
        }
    }

    /// React to a bus event. Opened pairs are terminal and leave the
    /// tracked set; deletions drop every pair of the capsule.
    pub fn handle_event(&self, event: &CapsuleEvent) {
        match event {
            CapsuleEvent::ReminderFired { .. } => self.tick(),
            CapsuleEvent::CapsuleOpened {
                capsule_id,
                group_id,
                ..
            } => {
                self.inner
                    .tracked
                    .lock()
                    .unwrap()
                    .remove(&(*capsule_id, *group_id));
            }
            CapsuleEvent::CapsuleDeleted { capsule_id } => {
                self.inner
                    .tracked
                    .lock()
                    .unwrap()
                    .retain(|(cid, _), _| cid != capsule_id);
            }
            CapsuleEvent::BecameReady { .. } => {}
        }
    }

    pub fn tracked_len(&self) -> usize {
        self.inner.tracked.lock().unwrap().len()
    }

    /// Periodic sweep loop. Ticks on the interval and reacts to bus events
    /// in between, so a reminder firing triggers an immediate re-evaluation
    /// instead of waiting out the interval.
    pub async fn run(&self) {
        let mut rx = self.inner.bus.subscribe();
        let mut interval = tokio::time::interval(self.inner.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                event = rx.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Scheduler lagged behind event bus, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}
