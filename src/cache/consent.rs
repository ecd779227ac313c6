//! Privacy-consent cache.
//!
//! Holds the set of users who accepted the privacy policy. Membership is
//! fail-closed: a user the cache has never seen, or any user before the first
//! fill, reads as not having consented.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::domain::UserId;

use super::config::{CacheConfig, is_stale};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::consent";

#[derive(Debug, Default)]
struct ConsentState {
    accepted: HashSet<UserId>,
    last_update: Option<Instant>,
}

pub struct ConsentCache {
    state: RwLock<ConsentState>,
    staleness: Duration,
}

impl ConsentCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(ConsentState::default()),
            staleness: config.staleness_threshold(),
        }
    }

    /// Replace the whole accepted set and mark the cache filled.
    pub fn initialize(&self, accepted: HashSet<UserId>) {
        let count = accepted.len();
        let mut state = rw_write(&self.state, SOURCE, "initialize");
        state.accepted = accepted;
        state.last_update = Some(Instant::now());
        drop(state);
        info!(users = count, "Consent cache initialized");
    }

    pub fn is_initialized(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_initialized")
            .last_update
            .is_some()
    }

    pub fn is_accepted(&self, user_id: UserId) -> bool {
        rw_read(&self.state, SOURCE, "is_accepted")
            .accepted
            .contains(&user_id)
    }

    /// Record a single acceptance, e.g. right after the user accepted the policy.
    pub fn add_user(&self, user_id: UserId) {
        if rw_write(&self.state, SOURCE, "add_user")
            .accepted
            .insert(user_id)
        {
            debug!(user_id, "User added to consent cache");
        }
    }

    pub fn remove_user(&self, user_id: UserId) {
        if rw_write(&self.state, SOURCE, "remove_user")
            .accepted
            .remove(&user_id)
        {
            debug!(user_id, "User removed from consent cache");
        }
    }

    /// Apply a precomputed diff against the cached set and restamp the cache.
    pub fn update_partial(&self, new_users: &HashSet<UserId>, removed_users: &HashSet<UserId>) {
        let mut state = rw_write(&self.state, SOURCE, "update_partial");
        state.accepted.extend(new_users.iter().copied());
        state.accepted.retain(|user| !removed_users.contains(user));
        state.last_update = Some(Instant::now());
        let total = state.accepted.len();
        drop(state);
        info!(
            added = new_users.len(),
            removed = removed_users.len(),
            total,
            "Consent cache updated partially"
        );
    }

    /// Restamp without touching membership, after a sync found nothing to change.
    pub fn mark_fresh(&self) {
        let mut state = rw_write(&self.state, SOURCE, "mark_fresh");
        if state.last_update.is_some() {
            state.last_update = Some(Instant::now());
        }
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update_at(Instant::now())
    }

    /// Staleness check against an explicit clock reading.
    pub fn needs_update_at(&self, now: Instant) -> bool {
        let last_update = rw_read(&self.state, SOURCE, "needs_update").last_update;
        is_stale(last_update, now, self.staleness)
    }

    /// Copy of the accepted set, used as the "cached" side of a diff.
    pub fn snapshot(&self) -> HashSet<UserId> {
        rw_read(&self.state, SOURCE, "snapshot").accepted.clone()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConsentCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
