//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheEntry, Tier};
use crate::store::ConnectionState;

/// Response body for GET /cache
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// Tier that served the entry
    pub tier: Tier,
    pub entry: CacheEntry,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, tier: Tier, entry: CacheEntry) -> Self {
        Self {
            key: key.into(),
            tier,
            entry,
        }
    }
}

/// Response body for PUT /cache
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored", key),
            key,
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
    /// Whether either tier actually held the key
    pub removed: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, removed: bool) -> Self {
        let key = key.into();
        let message = if removed {
            format!("Key '{}' deleted", key)
        } else {
            format!("Key '{}' was not cached", key)
        };
        Self {
            message,
            key,
            removed,
        }
    }
}

/// Response body for GET /api/revalidate
#[derive(Debug, Clone, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    /// Unix milliseconds
    pub now: u64,
    pub results: Vec<String>,
}

impl RevalidateResponse {
    pub fn new(results: Vec<String>) -> Self {
        Self {
            revalidated: true,
            now: crate::cache::current_timestamp_ms(),
            results,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status; the process stays healthy while the shared store is down
    pub status: String,
    pub shared_store: ConnectionState,
    pub shared_tier_enabled: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(shared_store: ConnectionState, shared_tier_enabled: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            shared_store,
            shared_tier_enabled,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheValue;

    #[test]
    fn test_get_response_serialize() {
        let entry = CacheEntry::new(
            CacheValue::Redirect {
                props: serde_json::json!({"destination": "/"}),
            },
            vec!["_N_T_/old".to_string()],
            None,
        );
        let resp = GetResponse::new("/old", Tier::Local, entry);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["tier"], "local");
        assert_eq!(json["entry"]["value"]["kind"], "REDIRECT");
        assert_eq!(json["entry"]["tags"][0], "_N_T_/old");
    }

    #[test]
    fn test_delete_response_message() {
        assert!(DeleteResponse::new("/a", true).message.contains("deleted"));
        assert!(DeleteResponse::new("/a", false).message.contains("not cached"));
    }

    #[test]
    fn test_revalidate_response_serialize() {
        let resp = RevalidateResponse::new(vec!["Revalidated tag: a".to_string()]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["revalidated"], true);
        assert!(json["now"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(ConnectionState::Ready, true);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("\"sharedStore\":\"READY\""));
        assert!(json.contains("timestamp"));
    }
}
