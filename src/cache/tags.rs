//! Tag Registry Module
//!
//! Lazy invalidation: a single hash in the shared store maps each tag to the
//! timestamp of its most recent invalidation. Entries are never touched; a
//! reader compares the registry against the entry's `lastModified`.

use std::collections::HashMap;

use crate::cache::{next_timestamp_ms, CacheValue, RequestContext};
use crate::error::Result;
use crate::store::ConnectionManager;

/// Marker prepended to a route key to form its implicit tag.
pub const IMPLICIT_TAG_PREFIX: &str = "_N_T_";

/// Name of the registry hash, appended to the key prefix.
pub const REVALIDATED_TAGS_KEY: &str = "__revalidated_tags__";

// == Tag Derivation ==
/// The implicit tag of a route key, or None for keys that are not routes.
pub fn implicit_tag_for(key: &str) -> Option<String> {
    key.starts_with('/')
        .then(|| format!("{IMPLICIT_TAG_PREFIX}{key}"))
}

/// Tags stored with a write: context tags, else the payload's own tags, else
/// the route's implicit tag. Duplicates are dropped, order is kept.
pub fn resolve_tags(key: &str, value: &CacheValue, ctx: &RequestContext) -> Vec<String> {
    let explicit: &[String] = if !ctx.tags.is_empty() {
        &ctx.tags
    } else {
        value.embedded_tags()
    };

    if explicit.is_empty() {
        return implicit_tag_for(key).into_iter().collect();
    }
    dedup(explicit.iter().cloned())
}

/// Entry tags plus the caller's implicit tags, deduplicated.
pub fn tags_to_check(entry_tags: &[String], implicit_tags: &[String]) -> Vec<String> {
    dedup(entry_tags.iter().chain(implicit_tags).cloned())
}

fn dedup(tags: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

// == Tag Registry ==
#[derive(Clone)]
pub struct TagRegistry {
    connection: ConnectionManager,
    hash_key: String,
}

impl TagRegistry {
    pub fn new(connection: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            connection,
            hash_key: format!("{key_prefix}{REVALIDATED_TAGS_KEY}"),
        }
    }

    /// Full shared-store key of the registry hash.
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    // == Invalidate ==
    /// Records `tag` as invalidated now. Returns the timestamp written.
    pub async fn invalidate(&self, tag: &str) -> Result<u64> {
        let at = next_timestamp_ms();
        self.invalidate_at(tag, at).await?;
        Ok(at)
    }

    /// Records an invalidation at `at`, unless a newer one is already
    /// recorded. Returns whether the registry changed.
    pub async fn invalidate_at(&self, tag: &str, at: u64) -> Result<bool> {
        self.connection
            .hash_set_if_greater(&self.hash_key, tag, at)
            .await
    }

    // == Last Invalidated ==
    /// Most recent invalidation among `tags`, or 0 when none was recorded.
    pub async fn last_invalidated(&self, tags: &[String]) -> Result<u64> {
        if tags.is_empty() {
            return Ok(0);
        }
        let values = self
            .connection
            .hash_get_many(&self.hash_key, tags)
            .await?;
        Ok(values
            .iter()
            .flatten()
            .filter_map(|v| v.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }

    /// Every recorded tag with its invalidation timestamp.
    pub async fn all(&self) -> Result<HashMap<String, u64>> {
        let raw = self.connection.hash_get_all(&self.hash_key).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(tag, ts)| ts.parse::<u64>().ok().map(|ts| (tag, ts)))
            .collect())
    }
}
