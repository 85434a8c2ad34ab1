//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared store address; None disables the shared tier
    pub redis_url: Option<String>,
    /// Namespace prefix for every shared-store key
    pub key_prefix: String,
    /// Maximum number of entries the local fallback store can hold
    pub local_capacity: usize,
    /// Default TTL in seconds for entries without an explicit lifespan
    pub default_ttl: u64,
    /// Deadline for establishing a connection, in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for a single shared-store command, in milliseconds
    pub operation_timeout_ms: u64,
    /// How long an operation waits for an in-flight connection, in milliseconds
    pub ready_wait_ms: u64,
    /// Reconnection attempts before a connection instance gives up
    pub max_reconnect_attempts: u32,
    /// Backoff step per reconnection attempt, in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Interval in seconds between supervisor checks for a dead connection
    pub reconnect_interval: u64,
    /// Whether shared-store records are gzip-compressed
    pub compression: bool,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` / `KV_URL` - Shared store address (default: unset, local only)
    /// - `CACHE_KEY_PREFIX` - Key namespace (default: "nextjs:")
    /// - `LOCAL_CACHE_CAPACITY` - Local store entries (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 60)
    /// - `CONNECT_TIMEOUT_MS` - Connect deadline (default: 5000)
    /// - `OPERATION_TIMEOUT_MS` - Per-command deadline (default: 1000)
    /// - `READY_WAIT_MS` - Readiness wait per operation (default: 1000)
    /// - `MAX_RECONNECT_ATTEMPTS` - Retries per connection instance (default: 5)
    /// - `RECONNECT_BASE_DELAY_MS` / `RECONNECT_MAX_DELAY_MS` - Backoff (default: 50 / 1000)
    /// - `RECONNECT_INTERVAL` - Supervisor interval in seconds (default: 30)
    /// - `CACHE_COMPRESSION` - "true"/"false" (default: true)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            redis_url: env::var("REDIS_URL")
                .or_else(|_| env::var("KV_URL"))
                .ok()
                .filter(|v| !v.trim().is_empty()),
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            local_capacity: parse_var("LOCAL_CACHE_CAPACITY").unwrap_or(defaults.local_capacity),
            default_ttl: parse_var("DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            connect_timeout_ms: parse_var("CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            operation_timeout_ms: parse_var("OPERATION_TIMEOUT_MS")
                .unwrap_or(defaults.operation_timeout_ms),
            ready_wait_ms: parse_var("READY_WAIT_MS").unwrap_or(defaults.ready_wait_ms),
            max_reconnect_attempts: parse_var("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay_ms: parse_var("RECONNECT_BASE_DELAY_MS")
                .unwrap_or(defaults.reconnect_base_delay_ms),
            reconnect_max_delay_ms: parse_var("RECONNECT_MAX_DELAY_MS")
                .unwrap_or(defaults.reconnect_max_delay_ms),
            reconnect_interval: parse_var("RECONNECT_INTERVAL")
                .unwrap_or(defaults.reconnect_interval),
            compression: env::var("CACHE_COMPRESSION")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "off"))
                .unwrap_or(defaults.compression),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "nextjs:".to_string(),
            local_capacity: 1000,
            default_ttl: 60,
            connect_timeout_ms: 5000,
            operation_timeout_ms: 1000,
            ready_wait_ms: 1000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 1000,
            reconnect_interval: 30,
            compression: true,
            server_port: 3000,
        }
    }
}
