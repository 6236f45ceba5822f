//! Operation Dispatcher
//!
//! Routes a validated operation to the matching backend call. Unit
//! conversion happens here so the backend only sees meters; the table
//! allow-list for read queries is enforced here as well, independent of
//! schema validation, because the allowed set is deployment configuration.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::spatial::backend::{BackendError, GeometryBackend, NeighborFeature};
use crate::spatial::units;

use super::operation::StructuredOperation;

const DEFAULT_DISTANCE_UNIT: &str = "meters";
const DEFAULT_AREA_UNIT: &str = "square_meters";

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Table '{table}' is not permitted. Allowed tables: {allowed}.")]
    TableNotPermitted { table: String, allowed: String },
    /// The backend refused the request. The display message is deliberately
    /// generic; the engine's own message stays in the logs.
    #[error("The geometry engine rejected the request parameters.")]
    BackendRejected,
    #[error("The geometry engine is unavailable.")]
    BackendUnavailable,
    #[error("Internal dispatch failure.")]
    Internal,
}

/// Result of one executed operation, shaped the way the response surfaces it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OperationResult {
    Buffer {
        geometry: Value,
        units: String,
    },
    Area {
        area: f64,
        units: String,
    },
    Intersection {
        geometry: Option<Value>,
    },
    Neighbors {
        features: Vec<NeighborFeature>,
        table: String,
        limit: i64,
    },
    Transformed {
        geometry: Value,
    },
}

pub async fn dispatch(
    operation: &StructuredOperation,
    backend: &dyn GeometryBackend,
    allowed_tables: &BTreeSet<String>,
    default_table: &str,
) -> Result<OperationResult, DispatchError> {
    match operation {
        StructuredOperation::Buffer {
            geometry,
            distance,
            units,
            srid,
        } => {
            let unit = units.as_deref().unwrap_or(DEFAULT_DISTANCE_UNIT);
            let meters = units::distance_to_meters(*distance, unit).ok_or_else(|| {
                // The validator guarantees the unit; reaching this is a bug.
                error!(unit, "dispatch.unknown_distance_unit");
                DispatchError::Internal
            })?;
            let buffered = backend
                .buffer(geometry, meters, *srid)
                .await
                .map_err(map_backend_error)?;
            Ok(OperationResult::Buffer {
                geometry: buffered,
                units: unit.to_string(),
            })
        }
        StructuredOperation::CalculateArea {
            geometry,
            units,
            srid,
        } => {
            let unit = units.as_deref().unwrap_or(DEFAULT_AREA_UNIT);
            let square_meters = backend
                .area_square_meters(geometry, *srid)
                .await
                .map_err(map_backend_error)?;
            let area = units::area_from_square_meters(square_meters, unit).ok_or_else(|| {
                error!(unit, "dispatch.unknown_area_unit");
                DispatchError::Internal
            })?;
            Ok(OperationResult::Area {
                area,
                units: unit.to_string(),
            })
        }
        StructuredOperation::FindIntersections {
            geometry,
            geometry_b,
            srid,
        } => {
            let intersection = backend
                .intersection(geometry, geometry_b, *srid)
                .await
                .map_err(map_backend_error)?;
            Ok(OperationResult::Intersection {
                geometry: intersection,
            })
        }
        StructuredOperation::NearestNeighbors {
            geometry,
            table,
            limit,
            srid,
        } => {
            let table = table.as_deref().unwrap_or(default_table).trim();
            if !allowed_tables.contains(table) {
                let allowed = allowed_tables
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                warn!(table, "dispatch.table_not_permitted");
                return Err(DispatchError::TableNotPermitted {
                    table: table.to_string(),
                    allowed,
                });
            }
            let features = backend
                .nearest_neighbors(geometry, table, *limit, *srid)
                .await
                .map_err(map_backend_error)?;
            Ok(OperationResult::Neighbors {
                features,
                table: table.to_string(),
                limit: *limit,
            })
        }
        StructuredOperation::TransformCrs {
            geometry,
            from_epsg,
            to_epsg,
        } => {
            let transformed = backend
                .transform_crs(geometry, *from_epsg, *to_epsg)
                .await
                .map_err(map_backend_error)?;
            Ok(OperationResult::Transformed {
                geometry: transformed,
            })
        }
    }
}

fn map_backend_error(err: BackendError) -> DispatchError {
    match err {
        BackendError::BadInput(detail) => {
            warn!(%detail, "dispatch.backend_rejected");
            DispatchError::BackendRejected
        }
        BackendError::Unavailable(detail) => {
            error!(%detail, "dispatch.backend_unavailable");
            DispatchError::BackendUnavailable
        }
    }
}
