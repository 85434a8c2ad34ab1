//! Connection Manager
//!
//! Owns the shared-store client and its lifecycle:
//!
//! ```text
//! DISCONNECTED --connect()--> CONNECTING --ok--> READY
//!      ^                          |                |
//!      +------ failure/timeout ---+                |
//!      +------ transport error / close() ----------+
//! ```
//!
//! After a transport error on a READY connection a reconnection sequence
//! starts in the background: up to `max_attempts` tries with a linear backoff
//! capped at `max_delay`. Only one sequence runs at a time. Giving up leaves
//! the manager DISCONNECTED; the next operation after `restart_interval`
//! starts a fresh connection, as does an explicit `connect()`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{connector_for_url, Connector, Expiry, KeyTtl, SharedStore};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == Connection State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

// == Reconnect Policy ==
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Deadline for one connection attempt
    pub connect_timeout: Duration,
    /// Deadline for one shared-store command
    pub operation_timeout: Duration,
    /// Attempts per reconnection sequence
    pub max_attempts: u32,
    /// Backoff step; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Minimum gap between lazy starts while DISCONNECTED
    pub restart_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            max_attempts: config.max_reconnect_attempts,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            restart_interval: Duration::from_secs(config.reconnect_interval.max(1)),
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

// == Connection Manager ==
struct Inner {
    connector: Option<Arc<dyn Connector>>,
    policy: ReconnectPolicy,
    client: RwLock<Option<Arc<dyn SharedStore>>>,
    state: watch::Sender<ConnectionState>,
    /// Held for the duration of a connect or reconnect sequence
    sequence: Mutex<()>,
    /// When the last connection was started, lazily or explicitly
    last_start: StdMutex<Option<Instant>>,
    closed: AtomicBool,
}

/// Process-wide owner of the shared-store client. Cheap to clone; clones
/// share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    // == Constructors ==
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self::build(Some(connector), policy)
    }

    /// A manager with no shared tier; it never becomes ready.
    pub fn disabled() -> Self {
        Self::build(None, ReconnectPolicy::default())
    }

    /// Builds the manager described by the configuration. A missing or
    /// unusable URL disables the shared tier rather than failing.
    pub fn from_config(config: &Config) -> Self {
        let policy = ReconnectPolicy::from_config(config);
        let Some(url) = config.redis_url.as_deref() else {
            warn!("No REDIS_URL found, shared tier disabled; using the local store only");
            return Self::build(None, policy);
        };
        match connector_for_url(url) {
            Ok(connector) => Self::build(Some(connector), policy),
            Err(e) => {
                warn!(error = %e, "Shared store not configured, using the local store only");
                Self::build(None, policy)
            }
        }
    }

    fn build(connector: Option<Arc<dyn Connector>>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                client: RwLock::new(None),
                state,
                sequence: Mutex::new(()),
                last_start: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    // == Readiness ==
    pub fn is_enabled(&self) -> bool {
        self.inner.connector.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Non-blocking readiness probe.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// True after `close()` until the next explicit `connect()`.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Masked target description, None when the shared tier is disabled.
    pub fn target(&self) -> Option<String> {
        self.inner.connector.as_ref().map(|c| c.describe())
    }

    /// Waits until READY, giving up after `timeout` or as soon as the manager
    /// is DISCONNECTED with nothing in flight.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Ready => return true,
                    ConnectionState::Disconnected => return false,
                    ConnectionState::Connecting => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        waited.unwrap_or(false)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "shared store state changed");
        }
    }

    // == Lifecycle ==
    /// Starts a connection in the background when the manager is
    /// DISCONNECTED: on first use, then at most once per
    /// `restart_interval`. Library users get lazy start and recovery
    /// through this without running the reconnect supervisor.
    pub fn ensure_started(&self) {
        if self.inner.connector.is_none() || self.is_closed() {
            return;
        }
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        {
            let mut last_start = self
                .inner
                .last_start
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last_start.is_some_and(|at| at.elapsed() < self.inner.policy.restart_interval) {
                return;
            }
            *last_start = Some(Instant::now());
        }
        debug!("starting shared store connection");
        self.set_state(ConnectionState::Connecting);
        let manager = self.clone();
        tokio::spawn(async move {
            manager.connect().await;
        });
    }

    /// Makes one connection attempt bounded by the connect timeout.
    ///
    /// If another sequence is already in flight this waits for its outcome
    /// instead of opening a second connection.
    pub async fn connect(&self) -> bool {
        let Some(connector) = self.inner.connector.clone() else {
            return false;
        };
        self.mark_started();
        self.inner.closed.store(false, Ordering::SeqCst);

        let Ok(_sequence) = self.inner.sequence.try_lock() else {
            return self.wait_until_ready(self.inner.policy.connect_timeout).await;
        };
        if self.is_ready() {
            return true;
        }

        self.attempt(connector.as_ref(), ConnectionState::Disconnected)
            .await
    }

    fn mark_started(&self) {
        *self
            .inner
            .last_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Runs a reconnection sequence. Returns false immediately if one is
    /// already running.
    pub async fn reconnect(&self) -> bool {
        let Some(connector) = self.inner.connector.clone() else {
            return false;
        };
        let Ok(_sequence) = self.inner.sequence.try_lock() else {
            debug!("reconnection already in flight");
            return false;
        };
        // An explicit connect() may have won the race for the lock.
        if self.is_ready() {
            return true;
        }

        let max_attempts = self.inner.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.inner.closed.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return false;
            }
            self.set_state(ConnectionState::Connecting);
            let delay = self.inner.policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to shared store");
            tokio::time::sleep(delay).await;

            let on_failure = if attempt == max_attempts {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Connecting
            };
            if self.attempt(connector.as_ref(), on_failure).await {
                info!(attempt, "reconnected to shared store");
                return true;
            }
        }

        error!(
            attempts = max_attempts,
            "shared store still unreachable, giving up until the next connect"
        );
        false
    }

    async fn attempt(&self, connector: &dyn Connector, on_failure: ConnectionState) -> bool {
        self.set_state(ConnectionState::Connecting);

        let connecting = async {
            let client = connector.connect().await?;
            client.ping().await?;
            Ok::<_, CacheError>(client)
        };

        let failure = match tokio::time::timeout(self.inner.policy.connect_timeout, connecting).await
        {
            Ok(Ok(client)) => {
                *self.inner.client.write().await = Some(client);
                self.set_state(ConnectionState::Ready);
                info!(store = %connector.describe(), "connected to shared store");
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connection timed out after {}ms",
                self.inner.policy.connect_timeout.as_millis()
            ),
        };

        warn!(store = %connector.describe(), error = %failure, "failed to connect to shared store");
        *self.inner.client.write().await = None;
        self.set_state(on_failure);
        false
    }

    /// Drops the client and stays DISCONNECTED until `connect()` is called.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        *self.inner.client.write().await = None;
        self.set_state(ConnectionState::Disconnected);
        info!("shared store connection closed");
    }

    /// READY -> DISCONNECTED, then kick off a background reconnection.
    fn connection_lost(&self, cause: &CacheError) {
        let was_ready = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Ready {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if !was_ready {
            return;
        }
        warn!(error = %cause, "lost shared store connection");

        // Waiters should hold on for the sequence rather than miss.
        self.set_state(ConnectionState::Connecting);
        let manager = self.clone();
        tokio::spawn(async move {
            manager.reconnect().await;
        });
    }

    // == Operations ==
    async fn run<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn SharedStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.inner.client.read().await.clone();
        let Some(client) = client else {
            return Err(CacheError::Unavailable);
        };
        if !self.is_ready() {
            return Err(CacheError::Unavailable);
        }

        match tokio::time::timeout(self.inner.policy.operation_timeout, call(client)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_fault() {
                    self.connection_lost(&e);
                }
                Err(e)
            }
            Err(_) => Err(CacheError::Timeout(op.to_string())),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("GET", |store| async move { store.get(key).await })
            .await
    }

    pub async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<()> {
        self.run("SET", |store| async move { store.set(key, value, expiry).await })
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.run("DEL", |store| async move { store.delete(key).await })
            .await
    }

    pub async fn hash_set_if_greater(&self, hash: &str, field: &str, value: u64) -> Result<bool> {
        self.run("HSET", |store| async move {
            store.hash_set_if_greater(hash, field, value).await
        })
        .await
    }

    pub async fn hash_get_many(&self, hash: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        self.run("HMGET", |store| async move { store.hash_get_many(hash, fields).await })
            .await
    }

    pub async fn hash_get_all(
        &self,
        hash: &str,
    ) -> Result<std::collections::HashMap<String, String>> {
        self.run("HGETALL", |store| async move { store.hash_get_all(hash).await })
            .await
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.run("SCAN", |store| async move { store.scan_prefix(prefix).await })
            .await
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.run("TTL", |store| async move { store.ttl(key).await })
            .await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryStore};
    use async_trait::async_trait;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            connect_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_millis(200),
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            restart_interval: Duration::from_secs(30),
        }
    }

    fn memory_manager() -> (MemoryStore, ConnectionManager) {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new(
            Arc::new(MemoryConnector::new(store.clone())),
            fast_policy(),
        );
        (store, manager)
    }

    /// A connector whose connection attempts never complete.
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self) -> Result<Arc<dyn SharedStore>> {
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "hanging://".to_string()
        }
    }

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
            ..fast_policy()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(4), Duration::from_millis(200));
        assert_eq!(policy.delay_for(100), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_disabled_manager_is_never_ready() {
        let manager = ConnectionManager::disabled();
        manager.ensure_started();

        assert!(!manager.is_enabled());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.connect().await);
        assert!(!manager.wait_until_ready(Duration::from_secs(5)).await);
        assert!(matches!(manager.get("k").await, Err(CacheError::Unavailable)));
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let (_store, manager) = memory_manager();

        assert!(manager.connect().await);
        assert!(manager.is_ready());
        assert!(manager.wait_until_ready(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let (store, manager) = memory_manager();
        store.set_available(false);

        assert!(!manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        let manager = ConnectionManager::new(Arc::new(HangingConnector), fast_policy());

        let started = Instant::now();
        assert!(!manager.connect().await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ensure_started_connects_lazily() {
        let (_store, manager) = memory_manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.ensure_started();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.wait_until_ready(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_ensure_started_retries_after_interval() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new(
            Arc::new(MemoryConnector::new(store.clone())),
            ReconnectPolicy {
                restart_interval: Duration::from_millis(50),
                ..fast_policy()
            },
        );
        store.set_available(false);

        manager.ensure_started();
        assert!(!manager.wait_until_ready(Duration::from_secs(1)).await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        store.set_available(true);
        // inside the interval nothing is attempted
        manager.ensure_started();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.ensure_started();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.wait_until_ready(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_transport_error_triggers_reconnect() {
        let (store, manager) = memory_manager();
        assert!(manager.connect().await);

        store.set_available(false);
        let result = manager.get("nextjs:/a").await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
        assert!(!manager.is_ready());

        store.set_available(true);
        assert!(manager.wait_until_ready(Duration::from_secs(1)).await);
        assert!(manager.get("nextjs:/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let (store, manager) = memory_manager();
        store.set_available(false);

        let started = Instant::now();
        assert!(!manager.reconnect().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // three attempts of 10, 20, 20 ms backoff
        assert!(started.elapsed() >= Duration::from_millis(50));

        store.set_available(true);
        assert!(manager.connect().await);
    }

    #[tokio::test]
    async fn test_only_one_reconnect_sequence_runs() {
        let manager = ConnectionManager::new(Arc::new(HangingConnector), fast_policy());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!manager.reconnect().await);
        first.abort();
    }

    #[tokio::test]
    async fn test_close_drops_client() {
        let (_store, manager) = memory_manager();
        assert!(manager.connect().await);

        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(manager.get("k").await, Err(CacheError::Unavailable)));
        manager.ensure_started();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
