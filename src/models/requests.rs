//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::cache::{split_tags, CacheValue, PathKind, RequestContext, RevalidateRequest};
use crate::error::{CacheError, Result};

/// Request body for PUT /cache
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The payload to cache
    pub value: CacheValue,
    /// Tags and lifespan for the write
    #[serde(default)]
    pub context: RequestContext,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        None
    }
}

/// Query string for GET and DELETE /cache
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub key: String,
    /// Comma-separated tags checked in addition to the entry's own
    #[serde(default)]
    pub implicit_tags: Option<String>,
}

impl KeyQuery {
    pub fn context(&self) -> RequestContext {
        RequestContext {
            implicit_tags: self
                .implicit_tags
                .as_deref()
                .map(split_tags)
                .unwrap_or_default(),
            ..RequestContext::default()
        }
    }
}

/// Query string for GET /api/revalidate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevalidateQuery {
    pub path: Option<String>,
    /// Comma-separated tags
    pub tags: Option<String>,
    /// "page" or "layout"
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl RevalidateQuery {
    /// Converts the query into a purge request. Empty parameters count as
    /// absent.
    pub fn into_request(self) -> Result<RevalidateRequest> {
        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("page") => Some(PathKind::Page),
            Some("layout") => Some(PathKind::Layout),
            Some(other) => {
                return Err(CacheError::InvalidRequest(format!(
                    "Unknown revalidation type '{other}', expected 'page' or 'layout'"
                )))
            }
        };

        Ok(RevalidateRequest {
            path: self.path.filter(|p| !p.trim().is_empty()),
            kind,
            tags: self.tags.as_deref().map(split_tags).unwrap_or_default(),
        })
    }
}
