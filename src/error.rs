//! Error types for the render cache
//!
//! Provides unified error handling using thiserror. Only caller-misuse errors
//! ever reach an HTTP client; everything else is logged and degraded.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Usage hint returned with invalidation requests that carry nothing to do.
pub const REVALIDATE_USAGE: &str = "/api/revalidate?path=/some-path&tags=tag1,tag2";

// == Cache Error Enum ==
/// Unified error type for the cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Shared store unreachable or the connection dropped mid-command
    #[error("Transport error: {0}")]
    Transport(String),

    /// Shared store answered, but rejected the command
    #[error("Backend error: {0}")]
    Backend(String),

    /// A shared-store operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Shared tier disabled or not ready
    #[error("Shared store unavailable")]
    Unavailable,

    /// An entry could not be turned into a stored record
    #[error("Encode error: {0}")]
    Encode(String),

    /// A stored record could not be turned back into an entry
    #[error("Decode error: {0}")]
    Decode(String),

    /// Key not present in either tier
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Invalidation request carrying neither a path nor tags
    #[error("No path or tags provided to revalidate")]
    NothingToRevalidate,

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    /// Returns true for faults that mean the connection itself is gone.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

// == Conversions ==
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            CacheError::Transport(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        match self {
            CacheError::NothingToRevalidate => {
                let body = Json(json!({
                    "message": self.to_string(),
                    "usage": REVALIDATE_USAGE,
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            CacheError::InvalidRequest(_) => {
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            CacheError::KeyNotFound(_) => {
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::NOT_FOUND, body).into_response()
            }
            CacheError::Unavailable => {
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
            }
            other => {
                let body = Json(json!({ "error": other.to_string() }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
