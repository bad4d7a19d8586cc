//! API Module
//!
//! HTTP handlers and routing for the cache layer REST API.
//!
//! # Endpoints
//! - `GET /resources/:key` - Read a resource through the cache
//! - `GET /aggregates/:key` - Read an aggregate through the cache
//! - `GET /snapshot` - Cached keys, in-flight keys and counters
//! - `POST /events` - Push a change notification
//! - `POST /refresh` - Force a refresh of every target
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
