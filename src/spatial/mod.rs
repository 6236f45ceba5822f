//! Spatial Module
//!
//! Unit conversion tables and the geometry backend seam. No geometry math
//! happens in this crate; the backend owns all of it.

pub mod backend;
pub mod postgis;
pub mod units;

pub use backend::{BackendError, GeometryBackend, NeighborFeature};
pub use postgis::PostgisBackend;
