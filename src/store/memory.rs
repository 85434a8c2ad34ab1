//! In-process shared store.
//!
//! Implements the [`SharedStore`] contract on top of a locked map, for
//! single-node deployments and for exercising the cache without a server.
//! Outages can be simulated with [`MemoryStore::set_available`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Connector, Expiry, KeyTtl, SharedStore};
use crate::cache::current_timestamp_ms;
use crate::error::{CacheError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    /// key -> (value, deadline in Unix milliseconds)
    strings: HashMap<String, (String, Option<u64>)>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryState {
    fn live_string(&mut self, key: &str, now_ms: u64) -> Option<&(String, Option<u64>)> {
        let expired = self
            .strings
            .get(key)
            .is_some_and(|(_, deadline)| deadline.is_some_and(|d| now_ms >= d));
        if expired {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }
}

// == Memory Store ==
/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggles whether the store answers. While unavailable every call fails
    /// with a transport error, as a dropped network connection would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of string keys currently held, expired ones excluded.
    pub async fn key_count(&self) -> usize {
        let now = current_timestamp_ms();
        let state = self.state.lock().await;
        state
            .strings
            .values()
            .filter(|(_, deadline)| deadline.map_or(true, |d| now < d))
            .count()
    }

    fn check(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::Transport("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .live_string(key, current_timestamp_ms())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<()> {
        self.check()?;
        let deadline = expiry.deadline_ms(current_timestamp_ms());
        let mut state = self.state.lock().await;
        state
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let existed = state.live_string(key, current_timestamp_ms()).is_some();
        state.strings.remove(key);
        Ok(existed)
    }

    async fn hash_set_if_greater(&self, hash: &str, field: &str, value: u64) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let fields = state.hashes.entry(hash.to_string()).or_default();
        let current = fields
            .get(field)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        if value <= current {
            return Ok(false);
        }
        fields.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_get_many(&self, hash: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        self.check()?;
        let state = self.state.lock().await;
        let stored = state.hashes.get(hash);
        Ok(fields
            .iter()
            .map(|field| stored.and_then(|h| h.get(field)).cloned())
            .collect())
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, String>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.hashes.get(hash).cloned().unwrap_or_default())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let now = current_timestamp_ms();
        let state = self.state.lock().await;
        let strings = state
            .strings
            .iter()
            .filter(|(key, (_, deadline))| {
                key.starts_with(prefix) && deadline.map_or(true, |d| now < d)
            })
            .map(|(key, _)| key.clone());
        let hashes = state
            .hashes
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned();
        let mut keys: Vec<String> = strings.chain(hashes).collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check()?;
        let now = current_timestamp_ms();
        let mut state = self.state.lock().await;
        if state.hashes.contains_key(key) {
            return Ok(KeyTtl::NoExpiry);
        }
        Ok(match state.live_string(key, now) {
            Some((_, Some(deadline))) => KeyTtl::Seconds(deadline.saturating_sub(now) / 1000),
            Some((_, None)) => KeyTtl::NoExpiry,
            None => KeyTtl::Missing,
        })
    }
}

// == Memory Connector ==
/// Hands out the same [`MemoryStore`] to every connection instance.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn SharedStore>> {
        self.store.check()?;
        Ok(Arc::new(self.store.clone()))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
