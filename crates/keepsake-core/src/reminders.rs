use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use keepsake_types::events::CapsuleEvent;
use keepsake_types::models::PendingReminder;

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::store::CapsuleStore;

struct TimerEntry {
    generation: Uuid,
    task: JoinHandle<()>,
}

/// One-shot release reminders, at most one live timer per capsule.
///
/// Arming persists a `PendingReminder` row first, then swaps in a fresh
/// timer task; any previous timer for the capsule is aborted, so reminders
/// never stack. A fired timer checks that its generation is still current
/// before emitting, which closes the race between firing and re-arming.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<ReminderInner>,
}

struct ReminderInner {
    store: Arc<dyn CapsuleStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    timers: Mutex<HashMap<Uuid, TimerEntry>>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn CapsuleStore>, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ReminderInner {
                store,
                clock,
                bus,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedule a reminder for `fire_at`, replacing any existing one for the
    /// same capsule. The persisted row is written before the timer starts so
    /// a restart can reconstruct pending reminders.
    pub async fn arm(&self, capsule_id: Uuid, fire_at: DateTime<Utc>) -> Result<()> {
        let generation = Uuid::new_v4();
        let reminder = PendingReminder {
            capsule_id,
            fire_at,
            handle: generation,
        };

        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || store.put_reminder(&reminder))
            .await
            .context("reminder persist task join error")??;

        let mut timers = self.inner.timers.lock().unwrap();
        if let Some(old) = timers.remove(&capsule_id) {
            old.task.abort();
        }
        let inner = self.inner.clone();
        let task = tokio::spawn(run_timer(inner, capsule_id, fire_at, generation));
        timers.insert(capsule_id, TimerEntry { generation, task });

        Ok(())
    }

    /// Cancel any pending reminder for the capsule. No-op if none exists.
    pub async fn cancel(&self, capsule_id: Uuid) -> Result<()> {
        if let Some(entry) = self.inner.timers.lock().unwrap().remove(&capsule_id) {
            entry.task.abort();
        }

        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || store.remove_reminder(capsule_id))
            .await
            .context("reminder cancel task join error")??;

        Ok(())
    }

    /// Boot reconciliation: start a timer for every persisted reminder that
    /// has no live one. Past-due reminders fire on their next poll instead
    /// of being dropped. Returns how many were re-armed.
    pub async fn rearm_from_store(&self) -> Result<usize> {
        let store = self.inner.store.clone();
        let rows = tokio::task::spawn_blocking(move || store.list_reminders())
            .await
            .context("reminder list task join error")??;

        let mut count = 0;
        for row in rows {
            let live = self
                .inner
                .timers
                .lock()
                .unwrap()
                .contains_key(&row.capsule_id);
            if live {
                continue;
            }
            match self.arm(row.capsule_id, row.fire_at).await {
                Ok(()) => count += 1,
                Err(e) => warn!("Failed to re-arm reminder for {}: {}", row.capsule_id, e),
            }
        }

        Ok(count)
    }

    /// Number of live timers.
    pub fn armed_count(&self) -> usize {
        self.inner.timers.lock().unwrap().len()
    }
}

async fn run_timer(
    inner: Arc<ReminderInner>,
    capsule_id: Uuid,
    fire_at: DateTime<Utc>,
    generation: Uuid,
) {
    let delay = (fire_at - inner.clock.now()).to_std().unwrap_or_default();
    tokio::time::sleep(delay).await;

    // Only the current generation may fire; a replaced or cancelled timer
    // that somehow reaches this point must stay silent.
    {
        let mut timers = inner.timers.lock().unwrap();
        match timers.get(&capsule_id) {
            Some(entry) if entry.generation == generation => {
                timers.remove(&capsule_id);
            }
            _ => return,
        }
    }

    inner.bus.emit(CapsuleEvent::ReminderFired {
        capsule_id,
        fire_at,
    });

    let store = inner.store.clone();
    let cleared = tokio::task::spawn_blocking(move || store.remove_reminder(capsule_id)).await;
    match cleared {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to clear fired reminder for {}: {}", capsule_id, e),
        Err(e) => warn!("Reminder cleanup task join error for {}: {}", capsule_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testutil::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn setup() -> (ReminderScheduler, Arc<MemoryStore>, EventBus, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = EventBus::new();
        let scheduler = ReminderScheduler::new(store.clone(), clock.clone(), bus.clone());
        (scheduler, store, bus, clock)
    }

    async fn expect_fired(
        rx: &mut tokio::sync::broadcast::Receiver<CapsuleEvent>,
        capsule_id: Uuid,
    ) {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reminder did not fire in time")
            .unwrap();
        match event {
            CapsuleEvent::ReminderFired { capsule_id: id, .. } => assert_eq!(id, capsule_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arm_fires_exactly_once() {
        let (scheduler, store, bus, clock) = setup();
        let mut rx = bus.subscribe();
        let capsule_id = Uuid::new_v4();

        scheduler
            .arm(capsule_id, clock.now() + ChronoDuration::milliseconds(30))
            .await
            .unwrap();
        assert_eq!(scheduler.armed_count(), 1);
        assert_eq!(store.reminder_count(), 1);

        expect_fired(&mut rx, capsule_id).await;

        // No second delivery, timer and row are gone
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(scheduler.armed_count(), 0);
        assert_eq!(store.reminder_count(), 0);
    }

    #[tokio::test]
    async fn test_rearm_replaces_instead_of_stacking() {
        let (scheduler, store, bus, clock) = setup();
        let mut rx = bus.subscribe();
        let capsule_id = Uuid::new_v4();
        let fire_at = clock.now() + ChronoDuration::milliseconds(50);

        scheduler.arm(capsule_id, fire_at).await.unwrap();
        scheduler.arm(capsule_id, fire_at).await.unwrap();
        assert_eq!(scheduler.armed_count(), 1);
        assert_eq!(store.reminder_count(), 1);

        expect_fired(&mut rx, capsule_id).await;

        // The replaced timer must not fire a second time
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let (scheduler, store, bus, clock) = setup();
        let mut rx = bus.subscribe();
        let capsule_id = Uuid::new_v4();

        scheduler
            .arm(capsule_id, clock.now() + ChronoDuration::milliseconds(30))
            .await
            .unwrap();
        scheduler.cancel(capsule_id).await.unwrap();
        assert_eq!(scheduler.armed_count(), 0);
        assert_eq!(store.reminder_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_cancel_without_reminder_is_noop() {
        let (scheduler, _store, _bus, _clock) = setup();
        scheduler.cancel(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rearm_from_store_recovers_persisted_reminders() {
        let (scheduler, store, bus, clock) = setup();
        let mut rx = bus.subscribe();

        // Rows left behind by a previous process, one of them already past due
        let due = Uuid::new_v4();
        let upcoming = Uuid::new_v4();
        store
            .put_reminder(&PendingReminder {
                capsule_id: due,
                fire_at: clock.now() - ChronoDuration::seconds(10),
                handle: Uuid::new_v4(),
            })
            .unwrap();
        store
            .put_reminder(&PendingReminder {
                capsule_id: upcoming,
                fire_at: clock.now() + ChronoDuration::milliseconds(40),
                handle: Uuid::new_v4(),
            })
            .unwrap();

        let rearmed = scheduler.rearm_from_store().await.unwrap();
        assert_eq!(rearmed, 2);

        expect_fired(&mut rx, due).await;
        expect_fired(&mut rx, upcoming).await;
        assert_eq!(store.reminder_count(), 0);
    }
}
