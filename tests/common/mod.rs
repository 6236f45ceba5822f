//! Shared test doubles for the integration suites.

use async_trait::async_trait;
use geogate::spatial::{BackendError, GeometryBackend, NeighborFeature};
use serde_json::{json, Value};

#[derive(Clone, Copy)]
pub enum Behavior {
    Normal,
    /// Every call fails as if the engine refused the input.
    Reject,
    /// Every call fails as if the engine were unreachable.
    Down,
}

pub struct MockBackend {
    behavior: Behavior,
}

impl MockBackend {
    pub fn normal() -> Self {
        Self {
            behavior: Behavior::Normal,
        }
    }

    pub fn with(behavior: Behavior) -> Self {
        Self { behavior }
    }

    fn gate(&self) -> Result<(), BackendError> {
        match self.behavior {
            Behavior::Normal => Ok(()),
            Behavior::Reject => Err(BackendError::BadInput(
                "ST_GeomFromGeoJSON: invalid geometry".into(),
            )),
            Behavior::Down => Err(BackendError::Unavailable("connection refused".into())),
        }
    }
}

#[async_trait]
impl GeometryBackend for MockBackend {
    async fn buffer(
        &self,
        _geometry: &Value,
        distance_meters: f64,
        srid: i32,
    ) -> Result<Value, BackendError> {
        self.gate()?;
        Ok(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]],
            "properties": {"buffer_meters": distance_meters, "srid": srid},
        }))
    }

    async fn area_square_meters(&self, _geometry: &Value, _srid: i32) -> Result<f64, BackendError> {
        self.gate()?;
        Ok(10_000.0)
    }

    async fn intersection(
        &self,
        _geometry_a: &Value,
        _geometry_b: &Value,
        _srid: i32,
    ) -> Result<Option<Value>, BackendError> {
        self.gate()?;
        Ok(Some(json!({"type": "Point", "coordinates": [0.5, 0.5]})))
    }

    async fn nearest_neighbors(
        &self,
        _geometry: &Value,
        _table: &str,
        limit: i64,
        _srid: i32,
    ) -> Result<Vec<NeighborFeature>, BackendError> {
        self.gate()?;
        let all = [
            NeighborFeature {
                id: json!("alpha"),
                geometry: Some(json!({"type": "Point", "coordinates": [0.1, 0.1]})),
                distance_meters: Some(11.0),
            },
            NeighborFeature {
                id: json!("beta"),
                geometry: Some(json!({"type": "Point", "coordinates": [0.2, 0.2]})),
                distance_meters: Some(22.0),
            },
        ];
        Ok(all.into_iter().take(limit as usize).collect())
    }

    async fn transform_crs(
        &self,
        geometry: &Value,
        _from_epsg: i32,
        _to_epsg: i32,
    ) -> Result<Value, BackendError> {
        self.gate()?;
        Ok(geometry.clone())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.gate()
    }
}
