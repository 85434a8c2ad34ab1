//! Cache Inspection
//!
//! Read-only enumeration of the shared namespace for monitoring: per-key TTL,
//! size and decoded metadata, plus aggregate counts by key category.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use crate::cache::tags::REVALIDATED_TAGS_KEY;
use crate::cache::{CacheStats, TieredCache};
use crate::store::ConnectionState;

// == Key Category ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyCategory {
    #[serde(rename = "page")]
    Page,
    #[serde(rename = "data/fetch")]
    Data,
    #[serde(rename = "tags")]
    Tags,
    #[serde(rename = "other")]
    Other,
}

/// Classifies a cache key (namespace prefix already stripped).
pub fn categorize(cache_key: &str) -> KeyCategory {
    if cache_key == REVALIDATED_TAGS_KEY {
        KeyCategory::Tags
    } else if cache_key.starts_with('/') {
        KeyCategory::Page
    } else if cache_key.len() >= 40
        && cache_key
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        KeyCategory::Data
    } else {
        KeyCategory::Other
    }
}

// == Report Types ==
/// Details of one shared-store key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReport {
    pub key: String,
    pub full_key: String,
    pub category: KeyCategory,
    pub ttl: String,
    pub ttl_seconds: i64,
    pub size: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCounts {
    pub total_keys: usize,
    pub page_keys: usize,
    pub data_keys: usize,
    pub tag_keys: usize,
    pub other_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub connected: bool,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub key_prefix: String,
    pub counts: KeyCounts,
    pub revalidated_tags: usize,
    pub local_entries: usize,
    pub local_capacity: usize,
    pub key_details: Vec<KeyReport>,
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub timestamp: String,
}

fn format_ttl(ttl: i64) -> String {
    match ttl {
        -1 => "no expiry".to_string(),
        secs if secs > 0 => format!("{}s ({}m)", secs, secs / 60),
        _ => "expired".to_string(),
    }
}

fn format_size(bytes: usize) -> String {
    if bytes > 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_ms(ms: u64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl TieredCache {
    // == Inspect ==
    /// Reports on the shared namespace, detailing at most `limit` entry keys.
    /// Never writes; keys that cannot be read or decoded keep only the
    /// details that were obtained.
    pub async fn inspect(&self, limit: usize) -> CacheReport {
        let (local_entries, local_capacity) = {
            let local = self.local().lock().await;
            (local.len(), local.capacity())
        };
        let stats = self.stats();
        let connection = self.connection();

        let mut report = CacheReport {
            connected: false,
            state: connection.state(),
            url: connection.target(),
            error: None,
            key_prefix: self.key_prefix().to_string(),
            counts: KeyCounts::default(),
            revalidated_tags: 0,
            local_entries,
            local_capacity,
            key_details: Vec::new(),
            hit_rate: stats.hit_rate(),
            stats,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        if !connection.is_enabled() {
            report.error = Some("No REDIS_URL configured".to_string());
            return report;
        }
        connection.ensure_started();
        if !connection.wait_until_ready(connection.policy().connect_timeout).await {
            report.error = Some("Shared store not ready".to_string());
            report.state = connection.state();
            return report;
        }

        let keys = match connection.scan_prefix(self.key_prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache inspection failed");
                report.error = Some(e.to_string());
                report.state = connection.state();
                return report;
            }
        };
        report.connected = true;
        report.state = connection.state();

        let mut entry_keys = Vec::new();
        for full_key in keys {
            report.counts.total_keys += 1;
            let cache_key = full_key
                .strip_prefix(self.key_prefix())
                .unwrap_or(&full_key)
                .to_string();
            match categorize(&cache_key) {
                KeyCategory::Page => report.counts.page_keys += 1,
                KeyCategory::Data => report.counts.data_keys += 1,
                KeyCategory::Tags => {
                    report.counts.tag_keys += 1;
                    continue;
                }
                KeyCategory::Other => report.counts.other_keys += 1,
            }
            entry_keys.push((cache_key, full_key));
        }

        if let Ok(tags) = self.registry().all().await {
            report.revalidated_tags = tags.len();
        }

        for (cache_key, full_key) in entry_keys.into_iter().take(limit) {
            report.key_details.push(self.describe_key(cache_key, full_key).await);
        }
        report
    }

    async fn describe_key(&self, key: String, full_key: String) -> KeyReport {
        let connection = self.connection();
        let ttl_seconds = connection
            .ttl(&full_key)
            .await
            .map(|ttl| ttl.as_seconds())
            .unwrap_or(-2);

        let mut report = KeyReport {
            category: categorize(&key),
            key,
            ttl: format_ttl(ttl_seconds),
            ttl_seconds,
            size: format_size(0),
            size_bytes: 0,
            last_modified: None,
            tags: None,
            expire_at: None,
            full_key,
        };

        let Ok(Some(stored)) = connection.get(&report.full_key).await else {
            return report;
        };
        report.size_bytes = stored.len();
        report.size = format_size(stored.len());

        if let Ok(entry) = self.codec().decode(&stored) {
            report.last_modified = format_ms(entry.last_modified);
            report.tags = Some(entry.tags);
            report.expire_at = entry
                .lifespan
                .and_then(|lifespan| format_ms(lifespan.expire_at_ms()));
        }
        report
    }
}
