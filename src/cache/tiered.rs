//! Tiered Cache Module
//!
//! The coordinator the rendering pipeline talks to. Reads prefer the shared
//! store and fall back to the local store; every write lands in exactly one
//! tier. Nothing here returns an error to the caller: faults are logged and
//! the operation degrades to the local tier.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::tags::{resolve_tags, tags_to_check, TagRegistry};
use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheStats, CacheValue, Codec, LocalStore, RequestContext,
    SharedLocalStore, StatsRecorder,
};
use crate::config::Config;
use crate::error::Result;
use crate::store::{ConnectionManager, Expiry};

// == Tier ==
/// Which tier served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Shared,
    Local,
}

// == Cache Runtime ==
/// Process-scoped state shared by every coordinator handle.
struct CacheRuntime {
    connection: ConnectionManager,
    registry: TagRegistry,
    local: SharedLocalStore,
    stats: StatsRecorder,
    codec: Codec,
    key_prefix: String,
    /// Shared-tier TTL for entries without a lifespan (seconds)
    default_ttl: u64,
    /// How long a call waits for a reconnecting shared store
    ready_wait: Duration,
}

// == Tiered Cache ==
/// Cheap to clone; clones share one runtime.
#[derive(Clone)]
pub struct TieredCache {
    runtime: Arc<CacheRuntime>,
}

impl TieredCache {
    // == Constructors ==
    /// Builds the cache and its connection manager from configuration. No
    /// connection is made until the first operation or an explicit connect.
    /// While the shared store stays unreachable, operations retry the
    /// connection at most once per `RECONNECT_INTERVAL`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_connection(config, ConnectionManager::from_config(config))
    }

    pub fn with_connection(config: &Config, connection: ConnectionManager) -> Self {
        info!(
            prefix = %config.key_prefix,
            local_capacity = config.local_capacity,
            compression = config.compression,
            shared_tier = connection.is_enabled(),
            "cache runtime initialized"
        );
        Self {
            runtime: Arc::new(CacheRuntime {
                registry: TagRegistry::new(connection.clone(), &config.key_prefix),
                connection,
                local: LocalStore::shared(config.local_capacity),
                stats: StatsRecorder::new(),
                codec: Codec::new(config.compression),
                key_prefix: config.key_prefix.clone(),
                default_ttl: config.default_ttl,
                ready_wait: config.ready_wait(),
            }),
        }
    }

    // == Accessors ==
    pub fn connection(&self) -> &ConnectionManager {
        &self.runtime.connection
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.runtime.registry
    }

    pub fn local(&self) -> &SharedLocalStore {
        &self.runtime.local
    }

    pub fn codec(&self) -> &Codec {
        &self.runtime.codec
    }

    pub fn key_prefix(&self) -> &str {
        &self.runtime.key_prefix
    }

    /// Shared-store key for a cache key.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.runtime.key_prefix, key)
    }

    pub fn stats(&self) -> CacheStats {
        self.runtime.stats.snapshot()
    }

    /// Starts the connection if needed and waits a bounded time for it.
    async fn shared_ready(&self) -> bool {
        let connection = &self.runtime.connection;
        if !connection.is_enabled() {
            return false;
        }
        connection.ensure_started();
        connection.is_ready() || connection.wait_until_ready(self.runtime.ready_wait).await
    }

    // == Get ==
    /// Looks up `key`, shared tier first.
    ///
    /// A shared entry whose tags (plus `ctx.implicit_tags`) were revalidated
    /// after it was written is treated as a miss but left in place.
    ///
    /// # Arguments
    /// * `key` - Cache key as supplied by the rendering pipeline
    /// * `ctx` - Per-call context; only `implicit_tags` is used here
    pub async fn get(&self, key: &str, ctx: &RequestContext) -> Option<(CacheEntry, Tier)> {
        if self.shared_ready().await {
            match self.get_shared(key, ctx).await {
                Ok(Some(entry)) => {
                    self.runtime.stats.record_shared_hit();
                    debug!(key = %key, "shared hit");
                    return Some((entry, Tier::Shared));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "shared read failed, checking local store");
                }
            }
        }

        let local = self
            .runtime
            .local
            .lock()
            .await
            .get(key, current_timestamp_ms());
        match local {
            Some(entry) => {
                self.runtime.stats.record_local_hit();
                debug!(key = %key, "local hit");
                Some((entry, Tier::Local))
            }
            None => {
                self.runtime.stats.record_miss();
                debug!(key = %key, "miss");
                None
            }
        }
    }

    async fn get_shared(&self, key: &str, ctx: &RequestContext) -> Result<Option<CacheEntry>> {
        let Some(stored) = self.runtime.connection.get(&self.storage_key(key)).await? else {
            return Ok(None);
        };

        let entry = match self.runtime.codec.decode(&stored) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable shared record, treating as miss");
                return Ok(None);
            }
        };
        if entry.is_expired() {
            return Ok(None);
        }

        let tags = tags_to_check(&entry.tags, &ctx.implicit_tags);
        if !tags.is_empty() {
            let invalidated = self.runtime.registry.last_invalidated(&tags).await?;
            if invalidated > entry.last_modified {
                self.runtime.stats.record_stale_read();
                debug!(
                    key = %key,
                    last_modified = entry.last_modified,
                    invalidated,
                    "stale shared entry"
                );
                return Ok(None);
            }
        }

        Ok(Some(entry))
    }

    // == Set ==
    /// Stores `value` under `key` in the shared tier when it is reachable,
    /// otherwise in the local tier.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `value` - Payload to cache
    /// * `ctx` - Explicit tags and optional hard expiry
    pub async fn set(&self, key: &str, value: CacheValue, ctx: &RequestContext) {
        let tags = resolve_tags(key, &value, ctx);
        let entry = CacheEntry::new(value, tags, ctx.lifespan);

        if entry.is_expired() {
            debug!(key = %key, "entry already expired, dropping existing copies");
            self.delete(key).await;
            return;
        }

        if self.shared_ready().await {
            match self.set_shared(key, &entry).await {
                Ok(()) => {
                    self.runtime.stats.record_shared_write();
                    // A copy left over from an outage must not shadow this write.
                    self.runtime.local.lock().await.delete(key);
                    debug!(key = %key, tags = ?entry.tags, "stored in shared tier");
                    return;
                }
                Err(e) => {
                    self.runtime.stats.record_write_fallback();
                    warn!(key = %key, error = %e, "shared write failed, using local store");
                }
            }
        }

        self.set_local(key, entry).await;
    }

    /// Expiry for a write: the hard lifespan, then the payload's own
    /// revalidate interval, then the configured default.
    fn expiry_for(&self, entry: &CacheEntry) -> Expiry {
        match entry.lifespan {
            Some(lifespan) => Expiry::At(lifespan.expire_at),
            None => Expiry::In(
                entry
                    .value
                    .revalidate_secs()
                    .unwrap_or(self.runtime.default_ttl),
            ),
        }
    }

    async fn set_shared(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let record = self.runtime.codec.encode(entry)?;
        self.runtime
            .connection
            .set(&self.storage_key(key), &record, self.expiry_for(entry))
            .await
    }

    async fn set_local(&self, key: &str, entry: CacheEntry) {
        let expires_at = self.expiry_for(&entry).deadline_ms(current_timestamp_ms());

        let evicted = self
            .runtime
            .local
            .lock()
            .await
            .set(key.to_string(), entry, Some(expires_at));
        self.runtime.stats.record_local_write();
        debug!(key = %key, "stored in local tier");

        if let Some(evicted) = evicted {
            self.runtime.stats.record_eviction();
            debug!(key = %evicted, "evicted least recently used local entry");
        }
    }

    // == Delete ==
    /// Removes `key` from whichever tier holds it. Returns whether anything
    /// was removed; a missing key is not an error.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        if self.shared_ready().await {
            match self.runtime.connection.delete(&self.storage_key(key)).await {
                Ok(existed) => removed = existed,
                Err(e) => warn!(key = %key, error = %e, "shared delete failed"),
            }
        }
        removed |= self.runtime.local.lock().await.delete(key);
        removed
    }

    // == Revalidate Tag ==
    /// Marks `tag` invalidated in the registry and purges local entries
    /// carrying it. The local sweep runs even when the shared tier is down.
    pub async fn revalidate_tag(&self, tag: &str) {
        self.runtime.stats.record_tag_revalidation();

        if self.shared_ready().await {
            match self.runtime.registry.invalidate(tag).await {
                Ok(at) => debug!(tag = %tag, at, "tag invalidated"),
                Err(e) => warn!(tag = %tag, error = %e, "tag registry write failed"),
            }
        }

        let swept = self.runtime.local.lock().await.remove_tagged(tag);
        if swept > 0 {
            debug!(tag = %tag, swept, "purged local entries");
        }
    }
}
