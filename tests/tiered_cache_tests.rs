//! Integration Tests for the Tiered Cache
//!
//! Drives the coordinator against in-process shared stores: a healthy one,
//! one that refuses connections, and one that never answers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use render_cache::cache::{current_timestamp_ms, Lifespan, Tier};
use render_cache::store::{
    ConnectionManager, ConnectionState, Connector, Expiry, KeyTtl, MemoryConnector, MemoryStore,
    ReconnectPolicy, SharedStore,
};
use render_cache::{CacheValue, Config, RequestContext, Result, TieredCache};
use tokio_test::{assert_err, assert_ok};

// == Helper Functions ==

fn test_config() -> Config {
    Config {
        local_capacity: 8,
        ready_wait_ms: 100,
        ..Config::default()
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        connect_timeout: Duration::from_millis(200),
        operation_timeout: Duration::from_millis(100),
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        restart_interval: Duration::from_secs(30),
    }
}

async fn shared_cache() -> (MemoryStore, TieredCache) {
    let store = MemoryStore::new();
    let connection =
        ConnectionManager::new(Arc::new(MemoryConnector::new(store.clone())), fast_policy());
    assert!(connection.connect().await);
    (store, TieredCache::with_connection(&test_config(), connection))
}

fn route(body: &str) -> CacheValue {
    CacheValue::AppRoute {
        body: body.as_bytes().to_vec(),
        status: 200,
        headers: BTreeMap::new(),
    }
}

fn tagged(tags: &[&str]) -> RequestContext {
    RequestContext::with_tags(tags.iter().copied())
}

/// A store that accepts the connection, then never answers a command.
struct StalledStore;

#[async_trait]
impl SharedStore for StalledStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &str, _expiry: Expiry) -> Result<()> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        std::future::pending().await
    }

    async fn hash_set_if_greater(&self, _hash: &str, _field: &str, _value: u64) -> Result<bool> {
        std::future::pending().await
    }

    async fn hash_get_many(&self, _hash: &str, _fields: &[String]) -> Result<Vec<Option<String>>> {
        std::future::pending().await
    }

    async fn hash_get_all(&self, _hash: &str) -> Result<HashMap<String, String>> {
        std::future::pending().await
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        std::future::pending().await
    }

    async fn ttl(&self, _key: &str) -> Result<KeyTtl> {
        std::future::pending().await
    }
}

struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self) -> Result<Arc<dyn SharedStore>> {
        Ok(Arc::new(StalledStore))
    }

    fn describe(&self) -> String {
        "stalled://".to_string()
    }
}

// == Scenario Tests ==

#[tokio::test]
async fn test_write_read_revalidate_rewrite() {
    let (_store, cache) = shared_cache().await;

    cache.set("/a", route("first"), &tagged(&["photos"])).await;
    let (entry, tier) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(tier, Tier::Shared);
    assert_eq!(entry.value, route("first"));

    cache.revalidate_tag("photos").await;
    assert!(cache.get("/a", &RequestContext::default()).await.is_none());

    cache.set("/a", route("second"), &tagged(&["photos"])).await;
    let (entry, _) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(entry.value, route("second"));

    let stats = cache.stats();
    assert_eq!(stats.shared_hits, 2);
    assert_eq!(stats.stale_reads, 1);
    assert_eq!(stats.tag_revalidations, 1);
}

#[tokio::test]
async fn test_already_expired_write_is_never_served() {
    let (_store, cache) = shared_cache().await;
    let expired = RequestContext {
        lifespan: Some(Lifespan {
            expire_at: current_timestamp_ms() / 1000 - 1,
        }),
        ..RequestContext::default()
    };

    cache.set("/b", route("gone"), &expired).await;

    assert!(cache.get("/b", &RequestContext::default()).await.is_none());
}

#[tokio::test]
async fn test_stored_record_is_untouched_by_revalidation() {
    let (store, cache) = shared_cache().await;
    cache.set("/a", route("v"), &tagged(&["photos"])).await;
    let before = assert_ok!(store.get("nextjs:/a").await);

    cache.revalidate_tag("photos").await;

    let after = assert_ok!(store.get("nextjs:/a").await);
    assert_eq!(before, after);
    assert!(after.is_some());
}

#[tokio::test]
async fn test_path_purge_reaches_untagged_route() {
    let (_store, cache) = shared_cache().await;
    cache.set("/blog/1", route("post"), &RequestContext::default()).await;
    cache
        .set("/blog/2", route("other"), &RequestContext::default())
        .await;

    cache.revalidate_tag("_N_T_/blog/1").await;

    assert!(cache
        .get("/blog/1", &RequestContext::default())
        .await
        .is_none());
    assert!(cache
        .get("/blog/2", &RequestContext::default())
        .await
        .is_some());
}

// == Concurrency Tests ==

const WORKERS: usize = 8;
const ROUNDS: usize = 40;
const KEYS: usize = 12;

fn payload(worker: usize, round: usize) -> CacheValue {
    route(&format!("w{}-r{}", worker, round))
}

/// Runs interleaved writes, reads and tag revalidations over a small key set
/// and checks every read returns a payload some worker actually wrote.
async fn hammer(cache: TieredCache) {
    let written: Arc<Vec<CacheValue>> = Arc::new(
        (0..WORKERS)
            .flat_map(|w| (0..ROUNDS).map(move |r| payload(w, r)))
            .collect(),
    );
    let capacity = test_config().local_capacity;

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let cache = cache.clone();
        let written = Arc::clone(&written);
        handles.push(tokio::spawn(async move {
            for round in 0..ROUNDS {
                let key = format!("/k{}", (worker * 7 + round) % KEYS);
                let tag = format!("t{}", round % 3);
                match round % 4 {
                    0 | 1 => cache.set(&key, payload(worker, round), &tagged(&[tag.as_str()])).await,
                    2 => cache.revalidate_tag(&tag).await,
                    _ => {}
                }
                if let Some((entry, _)) = cache.get(&key, &RequestContext::default()).await {
                    assert!(
                        written.contains(&entry.value),
                        "read a payload nobody wrote: {:?}",
                        entry.value
                    );
                }
                assert!(cache.local().lock().await.len() <= capacity);
            }
        }));
    }
    for handle in handles {
        assert_ok!(handle.await);
    }

    assert!(cache.local().lock().await.len() <= capacity);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flows_on_local_tier() {
    let cache = TieredCache::with_connection(&test_config(), ConnectionManager::disabled());

    hammer(cache.clone()).await;

    assert_eq!(cache.stats().shared_writes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flows_on_shared_tier() {
    let (store, cache) = shared_cache().await;

    hammer(cache.clone()).await;

    assert!(cache.connection().is_ready());
    assert!(store.key_count().await <= KEYS);
    assert!(cache.stats().shared_writes > 0);
}

// == Tier Placement Tests ==

#[tokio::test]
async fn test_single_tier_write_while_ready() {
    let (store, cache) = shared_cache().await;

    cache.set("/a", route("v"), &RequestContext::default()).await;

    assert_eq!(store.key_count().await, 1);
    assert!(!cache.local().lock().await.contains("/a"));
}

#[tokio::test]
async fn test_single_tier_write_while_down() {
    let (store, cache) = shared_cache().await;
    store.set_available(false);

    cache.set("/a", route("v"), &RequestContext::default()).await;
    store.set_available(true);

    assert_eq!(store.key_count().await, 0);
    assert!(cache.local().lock().await.contains("/a"));
    assert_eq!(cache.stats().write_fallbacks, 1);
}

#[tokio::test]
async fn test_shared_write_after_outage_replaces_local_copy() {
    let (store, cache) = shared_cache().await;
    store.set_available(false);
    cache.set("/a", route("during"), &RequestContext::default()).await;

    store.set_available(true);
    assert!(cache.connection().connect().await);
    cache.set("/a", route("after"), &RequestContext::default()).await;

    assert!(!cache.local().lock().await.contains("/a"));
    let (entry, tier) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(tier, Tier::Shared);
    assert_eq!(entry.value, route("after"));
}

// == Failure Handling Tests ==

#[tokio::test]
async fn test_unreachable_store_falls_back_transparently() {
    let store = MemoryStore::new();
    store.set_available(false);
    let connection =
        ConnectionManager::new(Arc::new(MemoryConnector::new(store.clone())), fast_policy());
    let cache = TieredCache::with_connection(&test_config(), connection);

    let started = Instant::now();
    cache.set("/a", route("v"), &tagged(&["photos"])).await;
    let (_, tier) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(tier, Tier::Local);

    cache.revalidate_tag("photos").await;
    assert!(cache.get("/a", &RequestContext::default()).await.is_none());

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(cache.connection().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_stalled_store_is_bounded_by_timeouts() {
    let connection = ConnectionManager::new(Arc::new(StalledConnector), fast_policy());
    assert!(connection.connect().await);
    let cache = TieredCache::with_connection(&test_config(), connection.clone());

    let started = Instant::now();
    cache.set("/a", route("v"), &RequestContext::default()).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(cache.local().lock().await.contains("/a"));

    let started = Instant::now();
    let (_, tier) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(tier, Tier::Local);
    assert!(started.elapsed() < Duration::from_secs(1));

    // a timeout alone does not drop the connection
    assert!(connection.is_ready());
    assert_err!(connection.get("nextjs:/a").await);
}

#[tokio::test]
async fn test_reconnect_restores_shared_reads() {
    let (store, cache) = shared_cache().await;
    cache.set("/a", route("v"), &RequestContext::default()).await;

    store.set_available(false);
    assert!(cache.get("/a", &RequestContext::default()).await.is_none());
    assert_ne!(cache.connection().state(), ConnectionState::Ready);

    store.set_available(true);
    let (entry, tier) = cache.get("/a", &RequestContext::default()).await.unwrap();
    assert_eq!(tier, Tier::Shared);
    assert_eq!(entry.value, route("v"));
}
