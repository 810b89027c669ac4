//! In-memory friend roster partitioned by presence state.
//!
//! Every friend lives in exactly one of three buckets (online, active,
//! offline). All buckets sit behind a single lock so moving a friend between
//! buckets is never observable half-done.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};
use vrclink_api::{Friend, PresenceState};

/// Number of friends per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub online: usize,
    pub active: usize,
    pub offline: usize,
}

impl BucketCounts {
    pub fn total(&self) -> usize {
        self.online + self.active + self.offline
    }
}

#[derive(Debug, Default)]
struct Buckets {
    online: HashMap<String, Friend>,
    active: HashMap<String, Friend>,
    offline: HashMap<String, Friend>,
}

impl Buckets {
    fn bucket(&self, state: PresenceState) -> &HashMap<String, Friend> {
        match state {
            PresenceState::Online => &self.online,
            PresenceState::Active => &self.active,
            PresenceState::Offline => &self.offline,
        }
    }

    fn bucket_mut(&mut self, state: PresenceState) -> &mut HashMap<String, Friend> {
        match state {
            PresenceState::Online => &mut self.online,
            PresenceState::Active => &mut self.active,
            PresenceState::Offline => &mut self.offline,
        }
    }

    fn find(&self, id: &str) -> Option<&Friend> {
        PresenceState::ALL
            .iter()
            .find_map(|state| self.bucket(*state).get(id))
    }

    fn take(&mut self, id: &str) -> Option<Friend> {
        // Removes from every bucket, so a corrupted roster heals on the next write.
        PresenceState::ALL
            .iter()
            .filter_map(|state| self.bucket_mut(*state).remove(id))
            .last()
    }

    fn clear(&mut self) {
        self.online.clear();
        self.active.clear();
        self.offline.clear();
    }
}

/// Thread-safe friend roster.
#[derive(Debug, Default)]
pub struct PresenceCache {
    buckets: RwLock<Buckets>,
}

impl PresenceCache {
    /// Create a new empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // A panic while holding the lock cannot leave the buckets inconsistent:
    // every write is a remove followed by an insert of owned values.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find a friend in any bucket.
    pub fn lookup(&self, id: &str) -> Option<Friend> {
        self.read().find(id).cloned()
    }

    /// The bucket a friend currently sits in.
    pub fn state_of(&self, id: &str) -> Option<PresenceState> {
        self.read().find(id).map(|f| f.presence_state)
    }

    /// Insert or replace a friend, placing it in the bucket for its state.
    ///
    /// Returns the entry it replaced.
    pub fn upsert(&self, friend: Friend) -> Option<Friend> {
        let mut buckets = self.write();
        let previous = buckets.take(&friend.id);

        trace!(
            user_id = %friend.id,
            from = ?previous.as_ref().map(|f| f.presence_state),
            to = %friend.presence_state,
            "cache: friend upserted"
        );

        buckets
            .bucket_mut(friend.presence_state)
            .insert(friend.id.clone(), friend);
        previous
    }

    /// Remove a friend. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> Option<Friend> {
        let removed = self.write().take(id);
        if removed.is_some() {
            trace!(user_id = %id, "cache: friend removed");
        }
        removed
    }

    /// Snapshot of one bucket, in no particular order.
    pub fn list_bucket(&self, state: PresenceState) -> Vec<Friend> {
        self.read().bucket(state).values().cloned().collect()
    }

    /// Replace the whole roster.
    ///
    /// When the input repeats an id the last occurrence wins.
    pub fn replace_all(&self, friends: impl IntoIterator<Item = Friend>) {
        let mut buckets = self.write();
        buckets.clear();
        for friend in friends {
            buckets.take(&friend.id);
            buckets
                .bucket_mut(friend.presence_state)
                .insert(friend.id.clone(), friend);
        }
        debug!(
            online = buckets.online.len(),
            active = buckets.active.len(),
            offline = buckets.offline.len(),
            "cache: roster replaced"
        );
    }

    /// Empty every bucket.
    pub fn drain(&self) {
        self.write().clear();
        debug!("cache: drained");
    }

    pub fn counts(&self) -> BucketCounts {
        let buckets = self.read();
        BucketCounts {
            online: buckets.online.len(),
            active: buckets.active.len(),
            offline: buckets.offline.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.counts().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
