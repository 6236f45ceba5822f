//! Unit Conversion Tables
//!
//! Static distance-to-meters and area-from-square-meters mappings. All
//! conversion happens here so the backend only ever sees meters.

use std::collections::HashMap;
use std::sync::LazyLock;

pub static DISTANCE_TO_METERS: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    HashMap::from([
        ("meter", 1.0),
        ("meters", 1.0),
        ("metre", 1.0),
        ("metres", 1.0),
        ("kilometer", 1_000.0),
        ("kilometers", 1_000.0),
        ("kilometre", 1_000.0),
        ("kilometres", 1_000.0),
        ("mile", 1_609.344),
        ("miles", 1_609.344),
        ("foot", 0.3048),
        ("feet", 0.3048),
        ("ft", 0.3048),
        ("yard", 0.9144),
        ("yards", 0.9144),
    ])
});

pub static AREA_FROM_SQ_METERS: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    HashMap::from([
        ("square_meter", 1.0),
        ("square_meters", 1.0),
        ("sqm", 1.0),
        ("hectare", 0.0001),
        ("hectares", 0.0001),
        ("acre", 0.000247105),
        ("acres", 0.000247105),
        ("square_kilometer", 1e-6),
        ("square_kilometers", 1e-6),
        ("sqkm", 1e-6),
    ])
});

pub fn is_distance_unit(unit: &str) -> bool {
    DISTANCE_TO_METERS.contains_key(unit)
}

pub fn is_area_unit(unit: &str) -> bool {
    AREA_FROM_SQ_METERS.contains_key(unit)
}

/// Convert a distance in the given unit to meters. The unit must already be
/// normalized (trimmed, lowercased) by the validator.
pub fn distance_to_meters(distance: f64, unit: &str) -> Option<f64> {
    DISTANCE_TO_METERS.get(unit).map(|factor| distance * factor)
}

/// Convert square meters to the given area unit.
pub fn area_from_square_meters(area_m2: f64, unit: &str) -> Option<f64> {
    AREA_FROM_SQ_METERS.get(unit).map(|factor| area_m2 * factor)
}
