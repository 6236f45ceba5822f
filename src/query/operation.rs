//! Structured Operation Validator
//!
//! The single validator behind every entry path: manual JSON, prompt
//! extraction, and LLM planner output all funnel through
//! [`StructuredOperation::validate`]. There is deliberately no `Deserialize`
//! impl on the operation type; the only way to obtain one is to pass the
//! strict schema.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::spatial::units;

/// The closed set of supported spatial operations.
pub const ALLOWED_OPERATIONS: [&str; 5] = [
    "buffer",
    "calculate_area",
    "find_intersections",
    "nearest_neighbors",
    "transform_crs",
];

/// Every key a candidate object may carry. Anything else is rejected rather
/// than silently dropped.
const RECOGNIZED_KEYS: [&str; 10] = [
    "operation",
    "geometry",
    "geometry_b",
    "table",
    "limit",
    "distance",
    "units",
    "srid",
    "from_epsg",
    "to_epsg",
];

pub const DEFAULT_LIMIT: i64 = 5;
pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_SRID: i32 = 4326;
const EPSG_MIN: i64 = 1;
const EPSG_MAX: i64 = 999_999;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A fully validated spatial operation. Each variant carries only the fields
/// that operation consumes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum StructuredOperation {
    Buffer {
        geometry: Value,
        distance: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        units: Option<String>,
        srid: i32,
    },
    CalculateArea {
        geometry: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        units: Option<String>,
        srid: i32,
    },
    FindIntersections {
        geometry: Value,
        geometry_b: Value,
        srid: i32,
    },
    NearestNeighbors {
        geometry: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        limit: i64,
        srid: i32,
    },
    TransformCrs {
        geometry: Value,
        from_epsg: i32,
        to_epsg: i32,
    },
}

impl StructuredOperation {
    /// Validate a loosely-typed candidate object into a typed operation.
    ///
    /// Enforces the closed schema (unknown keys are errors), the operation
    /// enum, per-operation required fields, and field-level constraints.
    /// Error messages name the offending field.
    pub fn validate(candidate: &Value) -> Result<Self, ValidationError> {
        let obj = candidate
            .as_object()
            .ok_or_else(|| ValidationError::new("Operation candidate must be a JSON object."))?;

        for key in obj.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::new(format!(
                    "Unrecognized field '{key}'. Allowed fields: {}.",
                    RECOGNIZED_KEYS.join(", ")
                )));
            }
        }

        let operation = require_string(obj, "operation")?.trim().to_lowercase();
        if !ALLOWED_OPERATIONS.contains(&operation.as_str()) {
            let mut allowed = ALLOWED_OPERATIONS.to_vec();
            allowed.sort_unstable();
            return Err(ValidationError::new(format!(
                "Unsupported operation '{operation}'. Allowed: {}.",
                allowed.join(", ")
            )));
        }

        // Constraints that hold for any operation the field appears on.
        let geometry = opt_geometry(obj, "geometry")?;
        let geometry_b = opt_geometry(obj, "geometry_b")?;
        let table = opt_table(obj)?;
        let limit = opt_limit(obj)?;
        let distance = opt_distance(obj)?;
        let units = opt_units(obj)?;
        let srid = opt_epsg(obj, "srid")?;
        let from_epsg = opt_epsg(obj, "from_epsg")?;
        let to_epsg = opt_epsg(obj, "to_epsg")?;
        let srid = srid.unwrap_or(DEFAULT_SRID);

        match operation.as_str() {
            "buffer" => {
                let geometry = geometry.ok_or_else(|| {
                    ValidationError::new("Buffer requires 'geometry' and 'distance'.")
                })?;
                let distance = distance.ok_or_else(|| {
                    ValidationError::new("Buffer requires 'geometry' and 'distance'.")
                })?;
                if let Some(unit) = &units {
                    if !units::is_distance_unit(unit) {
                        return Err(ValidationError::new(format!(
                            "Unsupported distance unit '{unit}' for buffer."
                        )));
                    }
                }
                Ok(Self::Buffer {
                    geometry,
                    distance,
                    units,
                    srid,
                })
            }
            "calculate_area" => {
                let geometry = geometry.ok_or_else(|| {
                    ValidationError::new("Area calculation requires 'geometry'.")
                })?;
                if let Some(unit) = &units {
                    if !units::is_area_unit(unit) {
                        return Err(ValidationError::new(format!(
                            "Unsupported area unit '{unit}' for calculate_area."
                        )));
                    }
                }
                Ok(Self::CalculateArea {
                    geometry,
                    units,
                    srid,
                })
            }
            "find_intersections" => {
                let (Some(geometry), Some(geometry_b)) = (geometry, geometry_b) else {
                    return Err(ValidationError::new(
                        "Intersection requires both 'geometry' and 'geometry_b'.",
                    ));
                };
                Ok(Self::FindIntersections {
                    geometry,
                    geometry_b,
                    srid,
                })
            }
            "nearest_neighbors" => {
                let geometry = geometry.ok_or_else(|| {
                    ValidationError::new("Nearest neighbors requires 'geometry'.")
                })?;
                Ok(Self::NearestNeighbors {
                    geometry,
                    table,
                    limit: limit.unwrap_or(DEFAULT_LIMIT),
                    srid,
                })
            }
            "transform_crs" => {
                let (Some(geometry), Some(from_epsg), Some(to_epsg)) =
                    (geometry, from_epsg, to_epsg)
                else {
                    return Err(ValidationError::new(
                        "CRS transformation requires 'geometry', 'from_epsg', and 'to_epsg'.",
                    ));
                };
                Ok(Self::TransformCrs {
                    geometry,
                    from_epsg,
                    to_epsg,
                })
            }
            _ => unreachable!("operation already checked against ALLOWED_OPERATIONS"),
        }
    }

    /// Short name used for dispatch logging and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::CalculateArea { .. } => "calculate_area",
            Self::FindIntersections { .. } => "find_intersections",
            Self::NearestNeighbors { .. } => "nearest_neighbors",
            Self::TransformCrs { .. } => "transform_crs",
        }
    }
}

fn require_string(obj: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::new(format!(
            "Field '{field}' must be a string."
        ))),
        None => Err(ValidationError::new(format!(
            "Missing required field '{field}'."
        ))),
    }
}

fn opt_geometry(obj: &Map<String, Value>, field: &str) -> Result<Option<Value>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Object(_)) => Ok(Some(value.clone())),
        Some(_) => Err(ValidationError::new(format!(
            "Field '{field}' must be a GeoJSON object."
        ))),
    }
}

fn opt_table(obj: &Map<String, Value>) -> Result<Option<String>, ValidationError> {
    match obj.get("table") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(_) => Err(ValidationError::new("Field 'table' must be a string.")),
    }
}

fn opt_limit(obj: &Map<String, Value>) -> Result<Option<i64>, ValidationError> {
    match obj.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let limit = value.as_i64().ok_or_else(|| {
                ValidationError::new("Field 'limit' must be an integer.")
            })?;
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(ValidationError::new(format!(
                    "Field 'limit' must be between 1 and {MAX_LIMIT}."
                )));
            }
            Ok(Some(limit))
        }
    }
}

fn opt_distance(obj: &Map<String, Value>) -> Result<Option<f64>, ValidationError> {
    match obj.get("distance") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let distance = value.as_f64().ok_or_else(|| {
                ValidationError::new("Field 'distance' must be a number.")
            })?;
            if distance < 0.0 {
                return Err(ValidationError::new(
                    "Field 'distance' must be non-negative.",
                ));
            }
            Ok(Some(distance))
        }
    }
}

fn opt_units(obj: &Map<String, Value>) -> Result<Option<String>, ValidationError> {
    match obj.get("units") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_lowercase())),
        Some(_) => Err(ValidationError::new("Field 'units' must be a string.")),
    }
}

fn opt_epsg(obj: &Map<String, Value>, field: &str) -> Result<Option<i32>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let code = value.as_i64().ok_or_else(|| {
                ValidationError::new(format!("Field '{field}' must be an integer."))
            })?;
            if !(EPSG_MIN..=EPSG_MAX).contains(&code) {
                return Err(ValidationError::new(format!(
                    "Field '{field}' must be between {EPSG_MIN} and {EPSG_MAX}."
                )));
            }
            Ok(Some(code as i32))
        }
    }
}
