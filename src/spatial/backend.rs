//! Geometry Backend Interface
//!
//! The core never computes geometry. Everything spatial goes through this
//! trait; [`crate::spatial::postgis::PostgisBackend`] is the production
//! implementation and tests substitute their own.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Backend failures split into the two classes callers must tell apart:
/// the engine refused the input (user-fixable) versus the engine could not
/// be reached or misbehaved.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("geometry engine rejected input: {0}")]
    BadInput(String),
    #[error("geometry engine unavailable: {0}")]
    Unavailable(String),
}

/// One row returned by a nearest-neighbor query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NeighborFeature {
    pub id: Value,
    pub geometry: Option<Value>,
    pub distance_meters: Option<f64>,
}

/// The five whitelisted spatial operations plus a readiness probe.
///
/// Distances are always meters by the time they reach the backend; unit
/// conversion is the dispatcher's job.
#[async_trait]
pub trait GeometryBackend: Send + Sync {
    async fn buffer(
        &self,
        geometry: &Value,
        distance_meters: f64,
        srid: i32,
    ) -> Result<Value, BackendError>;

    async fn area_square_meters(&self, geometry: &Value, srid: i32) -> Result<f64, BackendError>;

    /// Returns `None` when the two geometries do not overlap.
    async fn intersection(
        &self,
        geometry_a: &Value,
        geometry_b: &Value,
        srid: i32,
    ) -> Result<Option<Value>, BackendError>;

    async fn nearest_neighbors(
        &self,
        geometry: &Value,
        table: &str,
        limit: i64,
        srid: i32,
    ) -> Result<Vec<NeighborFeature>, BackendError>;

    async fn transform_crs(
        &self,
        geometry: &Value,
        from_epsg: i32,
        to_epsg: i32,
    ) -> Result<Value, BackendError>;

    /// Trivial connectivity check backing the readiness probe.
    async fn ping(&self) -> Result<(), BackendError>;
}
