//! API Module
//!
//! HTTP handlers and routing for the render cache server.
//!
//! # Endpoints
//! - `GET /api/revalidate?path=&tags=&type=` - Invalidate by path and/or tags
//! - `GET /api/cache-stats` - Shared namespace report
//! - `PUT /cache`, `GET /cache?key=`, `DELETE /cache?key=` - Coordinator operations
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
