//! HTTP server module
//!
//! - Axum router with health, version, catalog, mix and tempo endpoints
//! - Multipart upload parsing
//! - Error to status-code mapping
//! - CORS, request tracing and upload size limits

pub mod handlers;
pub mod routes;
pub mod upload;

pub use routes::create_router;
