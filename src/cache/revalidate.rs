//! Invalidation Requests
//!
//! Administrative purge by path and/or tag. A path resolves to its implicit
//! tag (plus a page or layout variant); tags are revalidated as given.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::tags::IMPLICIT_TAG_PREFIX;
use crate::cache::TieredCache;
use crate::error::{CacheError, Result};

// == Path Kind ==
/// Granularity of a path purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Page,
    Layout,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Page => "page",
            PathKind::Layout => "layout",
        }
    }
}

/// Tags a path purge revalidates.
pub fn path_tags(path: &str, kind: Option<PathKind>) -> Vec<String> {
    let base = format!("{IMPLICIT_TAG_PREFIX}{path}");
    match kind {
        None => vec![base],
        Some(kind) => {
            let scoped = format!("{}/{}", base.trim_end_matches('/'), kind.as_str());
            vec![base, scoped]
        }
    }
}

/// Splits a comma-separated tag list, dropping empty items.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

// == Revalidate Request ==
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevalidateRequest {
    pub path: Option<String>,
    pub kind: Option<PathKind>,
    pub tags: Vec<String>,
}

impl RevalidateRequest {
    fn validate(&self) -> Result<()> {
        if self.path.is_none() && self.tags.is_empty() {
            return Err(CacheError::NothingToRevalidate);
        }
        if let Some(path) = &self.path {
            if !path.starts_with('/') {
                return Err(CacheError::InvalidRequest(format!(
                    "Path must start with '/': {path}"
                )));
            }
        }
        Ok(())
    }
}

impl TieredCache {
    // == Revalidate ==
    /// Runs a purge request and returns one line per identifier revalidated.
    pub async fn revalidate(&self, request: &RevalidateRequest) -> Result<Vec<String>> {
        request.validate()?;
        let mut results = Vec::new();

        if let Some(path) = &request.path {
            for tag in path_tags(path, request.kind) {
                self.revalidate_tag(&tag).await;
            }
            let kind = request.kind.map_or("default", |k| k.as_str());
            info!(path = %path, kind, "revalidated path");
            results.push(format!("Revalidated path: {path} (type: {kind})"));
        }

        for tag in &request.tags {
            self.revalidate_tag(tag).await;
            info!(tag = %tag, "revalidated tag");
            results.push(format!("Revalidated tag: {tag}"));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheValue, RequestContext};
    use crate::config::Config;
    use crate::store::ConnectionManager;
    use std::collections::BTreeMap;

    fn page() -> CacheValue {
        CacheValue::AppPage {
            html: "<main/>".to_string(),
            rsc_data: None,
            segment_data: None,
            status: Some(200),
            headers: BTreeMap::new(),
            postponed: None,
        }
    }

    #[test]
    fn test_path_tags() {
        assert_eq!(path_tags("/blog", None), vec!["_N_T_/blog"]);
        assert_eq!(
            path_tags("/blog", Some(PathKind::Page)),
            vec!["_N_T_/blog", "_N_T_/blog/page"]
        );
        assert_eq!(
            path_tags("/", Some(PathKind::Layout)),
            vec!["_N_T_/", "_N_T_/layout"]
        );
    }

    #[test]
    fn test_split_tags_trims() {
        assert_eq!(split_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_tags(" , ").is_empty());
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let cache = TieredCache::with_connection(&Config::default(), ConnectionManager::disabled());

        let err = cache.revalidate(&RevalidateRequest::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::NothingToRevalidate));

        let relative = RevalidateRequest {
            path: Some("blog".to_string()),
            ..RevalidateRequest::default()
        };
        assert!(matches!(
            cache.revalidate(&relative).await,
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_path_and_tags_are_reported() {
        let cache = TieredCache::with_connection(&Config::default(), ConnectionManager::disabled());
        cache.set("/blog", page(), &RequestContext::default()).await;
        cache
            .set("/about", page(), &RequestContext::with_tags(["cms"]))
            .await;

        let request = RevalidateRequest {
            path: Some("/blog".to_string()),
            kind: None,
            tags: vec!["cms".to_string()],
        };
        let results = cache.revalidate(&request).await.unwrap();

        assert_eq!(
            results,
            vec![
                "Revalidated path: /blog (type: default)",
                "Revalidated tag: cms"
            ]
        );
        assert!(cache.get("/blog", &RequestContext::default()).await.is_none());
        assert!(cache.get("/about", &RequestContext::default()).await.is_none());
    }
}
