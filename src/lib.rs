//! Render Cache - a tiered cache for rendered pages and fetch results
//!
//! A shared key-value store tier with lazy tag invalidation, backed by a
//! bounded in-process LRU tier that takes over while the shared store is
//! unreachable.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheEntry, CacheValue, RequestContext, Tier, TieredCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_reconnect_task;
