//! Cache Entry Module
//!
//! Defines cached render artifacts, their metadata, and the per-call context
//! supplied by the rendering pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Payload Kinds ==
/// Discriminant of a [`CacheValue`], used where only the shape matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    AppRoute,
    AppPage,
    Fetch,
    Pages,
    Redirect,
    Image,
}

/// Response captured from a data fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchData {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

// == Cache Value ==
/// A render artifact. The set of shapes is closed; binary segments are held
/// as raw bytes in memory and only become text inside the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheValue {
    /// Output of a route handler
    #[serde(rename_all = "camelCase")]
    AppRoute {
        body: Vec<u8>,
        status: u16,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },

    /// Output of an app-router page
    #[serde(rename_all = "camelCase")]
    AppPage {
        html: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rsc_data: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        segment_data: Option<BTreeMap<String, Vec<u8>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        postponed: Option<String>,
    },

    /// Result of a cached data fetch
    #[serde(rename_all = "camelCase")]
    Fetch {
        data: FetchData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revalidate: Option<u64>,
        #[serde(default)]
        tags: Vec<String>,
    },

    /// Output of a pages-router page
    #[serde(rename_all = "camelCase")]
    Pages {
        html: String,
        page_data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },

    /// A cached redirect
    Redirect { props: serde_json::Value },

    /// An optimized image
    #[serde(rename_all = "camelCase")]
    Image {
        etag: String,
        buffer: Vec<u8>,
        extension: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revalidate: Option<u64>,
    },
}

impl CacheValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            CacheValue::AppRoute { .. } => ValueKind::AppRoute,
            CacheValue::AppPage { .. } => ValueKind::AppPage,
            CacheValue::Fetch { .. } => ValueKind::Fetch,
            CacheValue::Pages { .. } => ValueKind::Pages,
            CacheValue::Redirect { .. } => ValueKind::Redirect,
            CacheValue::Image { .. } => ValueKind::Image,
        }
    }

    /// Revalidation interval carried inside the payload (seconds). Zero
    /// means the payload did not ask for one.
    pub fn revalidate_secs(&self) -> Option<u64> {
        match self {
            CacheValue::Fetch { revalidate, .. } | CacheValue::Image { revalidate, .. } => {
                revalidate.filter(|secs| *secs > 0)
            }
            _ => None,
        }
    }

    /// Tags carried inside the payload itself (fetch results only).
    pub fn embedded_tags(&self) -> &[String] {
        match self {
            CacheValue::Fetch { tags, .. } => tags,
            _ => &[],
        }
    }
}

// == Lifespan ==
/// Hard expiry supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifespan {
    /// Absolute expiry, Unix seconds
    pub expire_at: u64,
}

impl Lifespan {
    pub fn expire_at_ms(&self) -> u64 {
        self.expire_at.saturating_mul(1000)
    }
}

// == Request Context ==
/// Per-call context supplied by the rendering pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    /// Explicit tags for a write
    pub tags: Vec<String>,
    /// Hard expiry for a write
    pub lifespan: Option<Lifespan>,
    /// Extra tags checked on read (e.g. the route's ancestor layouts)
    pub implicit_tags: Vec<String>,
}

impl RequestContext {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

// == Cache Entry ==
/// One cached value plus its metadata; the unit stored in either tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: CacheValue,
    /// Creation timestamp (Unix milliseconds)
    pub last_modified: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifespan: Option<Lifespan>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the next monotonic timestamp.
    pub fn new(value: CacheValue, tags: Vec<String>, lifespan: Option<Lifespan>) -> Self {
        Self {
            value,
            last_modified: next_timestamp_ms(),
            tags,
            lifespan,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` reaches its lifespan; entries without a
    /// lifespan never expire on their own.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.lifespan {
            Some(lifespan) => now_ms >= lifespan.expire_at_ms(),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }
}

// == Utility Functions ==
static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns a process-wide strictly increasing timestamp in milliseconds.
///
/// Tracks wall-clock time, but never repeats or goes backwards, so a write and
/// an invalidation issued within the same millisecond still order correctly.
pub fn next_timestamp_ms() -> u64 {
    let now = current_timestamp_ms();
    let mut prev = LAST_TIMESTAMP.load(Ordering::Acquire);
    loop {
        let next = now.max(prev + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}
