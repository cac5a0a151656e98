//! In-memory fakes for core tests: a store with the same compare-and-set
//! open semantics as the sqlite impl, a fixed membership table, and a spy
//! granter that records calls.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keepsake_types::models::{Capsule, CapsuleDraft, GroupLink, PendingReminder};

use crate::external::{AccessGranter, MembershipService};
use crate::store::CapsuleStore;

#[derive(Default)]
struct MemoryState {
    capsules: HashMap<Uuid, Capsule>,
    links: HashMap<(Uuid, Uuid), GroupLink>,
    reminders: HashMap<Uuid, PendingReminder>,
    transitions: usize,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Test helper: persist a draft directly, bypassing validation.
    pub fn insert_draft(&self, draft: &CapsuleDraft, now: DateTime<Utc>) -> Result<Capsule> {
        let capsule = Capsule {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            title: draft.title.clone(),
            category: draft.category.clone(),
            year: draft.year,
            release_at: draft.release_at,
            created_at: now,
            content_ref: draft.content_ref.clone(),
        };
        self.insert_capsule(&capsule, &draft.group_ids)?;
        Ok(capsule)
    }

    /// How many links have actually flipped false → true.
    pub fn transition_count(&self) -> usize {
        self.state.lock().unwrap().transitions
    }

    pub fn reminder_count(&self) -> usize {
        self.state.lock().unwrap().reminders.len()
    }

    pub fn capsule_count(&self) -> usize {
        self.state.lock().unwrap().capsules.len()
    }
}

impl CapsuleStore for MemoryStore {
    fn insert_capsule(&self, capsule: &Capsule, group_ids: &[Uuid]) -> Result<Vec<GroupLink>> {
        let mut state = self.state.lock().unwrap();
        if state.capsules.contains_key(&capsule.id) {
            return Err(anyhow!("duplicate capsule id"));
        }

        let links: Vec<GroupLink> = group_ids
            .iter()
            .map(|&group_id| GroupLink {
                capsule_id: capsule.id,
                group_id,
                is_opened: false,
                opened_at: None,
                scheduled_at: capsule.created_at,
            })
            .collect();

        state.capsules.insert(capsule.id, capsule.clone());
        for link in &links {
            state
                .links
                .insert((link.capsule_id, link.group_id), link.clone());
        }
        Ok(links)
    }

    fn list_active(&self, group_id: Uuid) -> Result<Vec<(Capsule, GroupLink)>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<(Capsule, GroupLink)> = state
            .links
            .values()
            .filter(|l| l.group_id == group_id && !l.is_opened)
            .map(|l| (state.capsules[&l.capsule_id].clone(), l.clone()))
            .collect();
        rows.sort_by_key(|(c, _)| (c.release_at, c.id));
        Ok(rows)
    }

    fn get_link(&self, capsule_id: Uuid, group_id: Uuid) -> Result<Option<(Capsule, GroupLink)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .get(&(capsule_id, group_id))
            .map(|l| (state.capsules[&capsule_id].clone(), l.clone())))
    }

    fn mark_opened(
        &self,
        capsule_id: Uuid,
        group_id: Uuid,
        opened_at: DateTime<Utc>,
    ) -> Result<Option<(GroupLink, bool)>> {
        let mut state = self.state.lock().unwrap();
        let Some(link) = state.links.get_mut(&(capsule_id, group_id)) else {
            return Ok(None);
        };

        if link.is_opened {
            return Ok(Some((link.clone(), false)));
        }

        link.is_opened = true;
        link.opened_at = Some(opened_at);
        let updated = link.clone();
        state.transitions += 1;
        Ok(Some((updated, true)))
    }

    fn delete_capsule(&self, capsule_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.capsules.remove(&capsule_id).is_none() {
            return Ok(false);
        }
        state.links.retain(|(cid, _), _| *cid != capsule_id);
        state.reminders.remove(&capsule_id);
        Ok(true)
    }

    fn active_groups(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        let groups: HashSet<Uuid> = state
            .links
            .values()
            .filter(|l| !l.is_opened)
            .map(|l| l.group_id)
            .collect();
        Ok(groups.into_iter().collect())
    }

    fn put_reminder(&self, reminder: &PendingReminder) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .reminders
            .insert(reminder.capsule_id, reminder.clone());
        Ok(())
    }

    fn remove_reminder(&self, capsule_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reminders
            .remove(&capsule_id)
            .is_some())
    }

    fn list_reminders(&self) -> Result<Vec<PendingReminder>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reminders
            .values()
            .cloned()
            .collect())
    }
}

/// Membership backed by an in-memory set of (group, user) pairs.
pub struct StaticMembership {
    members: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashSet::new()),
        }
    }

    pub fn add(&self, group_id: Uuid, user_id: Uuid) {
        self.members.lock().unwrap().insert((group_id, user_id));
    }
}

#[async_trait]
impl MembershipService for StaticMembership {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.members.lock().unwrap().contains(&(group_id, user_id)))
    }
}

/// Membership service that never answers — for exercising call timeouts.
pub struct UnreachableMembership;

#[async_trait]
impl MembershipService for UnreachableMembership {
    async fn is_member(&self, _group_id: Uuid, _user_id: Uuid) -> Result<bool> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(true)
    }
}

/// Records every grant call so tests can assert side effects happen once.
pub struct SpyGranter {
    grants: Mutex<Vec<(String, Uuid)>>,
}

impl SpyGranter {
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.grants.lock().unwrap().len()
    }
}

#[async_trait]
impl AccessGranter for SpyGranter {
    async fn grant(&self, content_ref: &str, group_id: Uuid) -> Result<()> {
        self.grants
            .lock()
            .unwrap()
            .push((content_ref.to_string(), group_id));
        Ok(())
    }
}
