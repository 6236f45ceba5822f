//! Geogate
//!
//! A structured geospatial query gateway: validates structured or
//! natural-language operation requests, authorizes and rate-limits callers,
//! delegates the spatial math to a PostGIS backend, and returns grounded,
//! audited results.

pub mod config;
pub mod error;
pub mod governance;
pub mod llm;
pub mod query;
pub mod security;
pub mod server;
pub mod spatial;

// Re-exports for convenience
pub use config::Settings;
pub use error::GatewayError;
pub use query::StructuredOperation;
pub use server::{router, AppState};
