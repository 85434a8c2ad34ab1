//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::cache::{CacheReport, TieredCache, DEFAULT_INSPECT_LIMIT};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HealthResponse, KeyQuery, RevalidateQuery, RevalidateResponse,
    SetRequest, SetResponse,
};

/// Application state shared across all handlers.
///
/// The cache handle is cheap to clone; every clone shares one runtime.
#[derive(Clone)]
pub struct AppState {
    pub cache: TieredCache,
}

impl AppState {
    pub fn new(cache: TieredCache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(TieredCache::from_config(config))
    }
}

/// Handler for PUT /cache
///
/// Stores a payload in whichever tier is available.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state.cache.set(&req.key, req.value, &req.context).await;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /cache?key=...&implicitTags=...
pub async fn get_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<GetResponse>> {
    let ctx = query.context();
    match state.cache.get(&query.key, &ctx).await {
        Some((entry, tier)) => Ok(Json(GetResponse::new(query.key, tier, entry))),
        None => Err(CacheError::KeyNotFound(query.key)),
    }
}

/// Handler for DELETE /cache?key=...
pub async fn delete_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Json<DeleteResponse> {
    let removed = state.cache.delete(&query.key).await;
    Json(DeleteResponse::new(query.key, removed))
}

/// Handler for GET /api/revalidate
///
/// Purges by path and/or comma-separated tags.
pub async fn revalidate_handler(
    State(state): State<AppState>,
    Query(query): Query<RevalidateQuery>,
) -> Result<Json<RevalidateResponse>> {
    let request = query.into_request()?;
    let results = state.cache.revalidate(&request).await?;
    Ok(Json(RevalidateResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub limit: Option<usize>,
}

/// Handler for GET /api/cache-stats
pub async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<CacheReport> {
    let limit = query.limit.unwrap_or(DEFAULT_INSPECT_LIMIT);
    Json(state.cache.inspect(limit).await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connection = state.cache.connection();
    Json(HealthResponse::healthy(
        connection.state(),
        connection.is_enabled(),
    ))
}
