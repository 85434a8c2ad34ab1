//! Cache Module
//!
//! Tiered render cache: a shared store tier with lazy tag invalidation and a
//! bounded in-process LRU tier used whenever the shared store is unavailable.

mod codec;
mod entry;
mod inspect;
mod local;
mod lru;
mod revalidate;
mod stats;
pub mod tags;
mod tiered;


// Re-export public types
pub use codec::Codec;
pub use entry::{
    current_timestamp_ms, next_timestamp_ms, CacheEntry, CacheValue, FetchData, Lifespan,
    RequestContext, ValueKind,
};
pub use inspect::{categorize, CacheReport, KeyCategory, KeyCounts, KeyReport};
pub use local::{LocalStore, SharedLocalStore};
pub(crate) use lru::LruTracker;
pub use revalidate::{path_tags, split_tags, PathKind, RevalidateRequest};
pub use stats::{CacheStats, StatsRecorder};
pub use tags::TagRegistry;
pub use tiered::{Tier, TieredCache};

// == Public Constants ==
/// Keys detailed by the inspection report by default.
pub const DEFAULT_INSPECT_LIMIT: usize = 30;
