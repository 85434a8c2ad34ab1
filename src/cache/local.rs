//! Local Store Module
//!
//! Bounded in-process fallback tier: a HashMap of slots with LRU eviction.
//! Expiry is never swept in the background; a slot past its deadline is
//! dropped the next time it is read.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::{CacheEntry, LruTracker};

/// Process-wide handle to the local store. Reads take the lock too, since a
/// hit reorders recency.
pub type SharedLocalStore = Arc<Mutex<LocalStore>>;

// == Local Slot ==
#[derive(Debug, Clone)]
struct LocalSlot {
    entry: CacheEntry,
    /// Hard deadline (Unix milliseconds), None = kept until evicted
    expires_at: Option<u64>,
}

// == Local Store ==
#[derive(Debug)]
pub struct LocalStore {
    slots: HashMap<String, LocalSlot>,
    lru: LruTracker,
    capacity: usize,
}

impl LocalStore {
    // == Constructor ==
    /// Creates an empty store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            lru: LruTracker::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn shared(capacity: usize) -> SharedLocalStore {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    // == Get ==
    /// Returns a copy of the entry when present and unexpired at `now_ms`,
    /// refreshing its recency. Expired slots are removed on the way out.
    pub fn get(&mut self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        let slot = self.slots.get(key)?;

        let expired = slot.expires_at.is_some_and(|deadline| now_ms >= deadline)
            || slot.entry.is_expired_at(now_ms);
        if expired {
            self.delete(key);
            return None;
        }

        let entry = slot.entry.clone();
        self.lru.touch(key);
        Some(entry)
    }

    // == Set ==
    /// Stores an entry, evicting the least recently used slot first when a
    /// new key would exceed capacity. Returns the evicted key, if any.
    pub fn set(
        &mut self,
        key: String,
        entry: CacheEntry,
        expires_at: Option<u64>,
    ) -> Option<String> {
        let mut evicted = None;

        if !self.slots.contains_key(&key) && self.slots.len() >= self.capacity {
            if let Some(oldest) = self.lru.evict_oldest() {
                self.slots.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.lru.touch(&key);
        self.slots.insert(key, LocalSlot { entry, expires_at });
        evicted
    }

    // == Delete ==
    /// Removes a key. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.slots.remove(key).is_some()
    }

    // == Tag Sweep ==
    /// Deletes every slot whose tags include `tag`. Returns the number removed.
    pub fn remove_tagged(&mut self, tag: &str) -> usize {
        let doomed: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.delete(key);
        }
        doomed.len()
    }

    /// Membership check that leaves recency untouched.
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
