//! Reconnect Supervisor Task
//!
//! A connection instance gives up after its bounded retry sequence. This task
//! periodically issues a fresh `connect()` so the shared tier comes back once
//! the store does.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::{ConnectionManager, ConnectionState};

/// Spawns the supervisor.
///
/// # Arguments
/// * `connection` - The process-wide connection manager
/// * `interval_secs` - Seconds between checks (minimum 1)
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during graceful shutdown.
pub fn spawn_reconnect_task(connection: ConnectionManager, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting reconnect supervisor with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            if !connection.is_enabled() || connection.is_closed() {
                continue;
            }
            if connection.state() != ConnectionState::Disconnected {
                continue;
            }

            info!("Shared store disconnected, attempting a fresh connection");
            if connection.connect().await {
                info!("Shared tier restored");
            } else {
                debug!("Shared store still unreachable");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryStore, ReconnectPolicy};
    use std::sync::Arc;

    fn manager(store: &MemoryStore) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(MemoryConnector::new(store.clone())),
            ReconnectPolicy {
                connect_timeout: Duration::from_millis(100),
                ..ReconnectPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn test_supervisor_restores_connection() {
        let store = MemoryStore::new();
        let connection = manager(&store);
        store.set_available(false);
        assert!(!connection.connect().await);

        let handle = spawn_reconnect_task(connection.clone(), 1);
        store.set_available(true);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(connection.is_ready(), "Supervisor should have reconnected");

        handle.abort();
    }

    #[tokio::test]
    async fn test_supervisor_respects_close() {
        let store = MemoryStore::new();
        let connection = manager(&store);
        assert!(connection.connect().await);
        connection.close().await;

        let handle = spawn_reconnect_task(connection.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        handle.abort();
    }

    #[tokio::test]
    async fn test_supervisor_can_be_aborted() {
        let handle = spawn_reconnect_task(ConnectionManager::disabled(), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
