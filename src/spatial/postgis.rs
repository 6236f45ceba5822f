//! PostGIS Geometry Backend
//!
//! All spatial SQL lives here. Geography casts keep distance and area
//! calculations accurate regardless of latitude, matching what the API
//! promises about meters and square meters.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::backend::{BackendError, GeometryBackend, NeighborFeature};

const GEOM_COLUMN: &str = "geom";
const ID_COLUMN: &str = "id";

const BUFFER_SQL: &str = r#"
    SELECT ST_AsGeoJSON(
        ST_SetSRID(
            ST_Buffer(
                ST_SetSRID(ST_GeomFromGeoJSON($1), $2)::geography,
                $3
            )::geometry,
            $2
        )
    )
"#;

const AREA_SQL: &str = r#"
    SELECT ST_Area(
        ST_SetSRID(ST_GeomFromGeoJSON($1), $2)::geography
    )
"#;

const INTERSECTION_SQL: &str = r#"
    SELECT ST_AsGeoJSON(
        ST_Intersection(
            ST_SetSRID(ST_GeomFromGeoJSON($1), $3),
            ST_SetSRID(ST_GeomFromGeoJSON($2), $3)
        )
    )
"#;

const TRANSFORM_SQL: &str = r#"
    SELECT ST_AsGeoJSON(
        ST_Transform(
            ST_SetSRID(ST_GeomFromGeoJSON($1), $2),
            $3
        )
    )
"#;

pub struct PostgisBackend {
    pool: PgPool,
}

impl PostgisBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeometryBackend for PostgisBackend {
    async fn buffer(
        &self,
        geometry: &Value,
        distance_meters: f64,
        srid: i32,
    ) -> Result<Value, BackendError> {
        let payload: Option<String> = sqlx::query_scalar(BUFFER_SQL)
            .bind(geometry.to_string())
            .bind(srid)
            .bind(distance_meters)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        let geojson =
            payload.ok_or_else(|| BackendError::BadInput("buffer returned no geometry".into()))?;
        parse_geojson(&geojson)
    }

    async fn area_square_meters(&self, geometry: &Value, srid: i32) -> Result<f64, BackendError> {
        let area: Option<f64> = sqlx::query_scalar(AREA_SQL)
            .bind(geometry.to_string())
            .bind(srid)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        area.ok_or_else(|| BackendError::BadInput("area calculation returned no result".into()))
    }

    async fn intersection(
        &self,
        geometry_a: &Value,
        geometry_b: &Value,
        srid: i32,
    ) -> Result<Option<Value>, BackendError> {
        let payload: Option<String> = sqlx::query_scalar(INTERSECTION_SQL)
            .bind(geometry_a.to_string())
            .bind(geometry_b.to_string())
            .bind(srid)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        match payload {
            Some(geojson) => Ok(Some(parse_geojson(&geojson)?)),
            None => Ok(None),
        }
    }

    async fn nearest_neighbors(
        &self,
        geometry: &Value,
        table: &str,
        limit: i64,
        srid: i32,
    ) -> Result<Vec<NeighborFeature>, BackendError> {
        // Both the KNN ordering and the reported distance use the same
        // geography-based calculation so ordering matches the numbers.
        let sql = format!(
            r#"
            SELECT
                {id}::text AS id,
                ST_AsGeoJSON({geom}) AS geom_json,
                ST_Distance(
                    ST_Transform({geom}, 4326)::geography,
                    ST_Transform(ST_SetSRID(ST_GeomFromGeoJSON($1), $2), 4326)::geography
                ) AS distance_m
            FROM {table}
            ORDER BY ST_Transform({geom}, 4326)::geography <->
                     ST_Transform(ST_SetSRID(ST_GeomFromGeoJSON($1), $2), 4326)::geography
            LIMIT $3
            "#,
            id = quote_ident(ID_COLUMN)?,
            geom = quote_ident(GEOM_COLUMN)?,
            table = quote_ident(table)?,
        );
        debug!(table, limit, "spatial.nearest_neighbors");

        let rows = sqlx::query(&sql)
            .bind(geometry.to_string())
            .bind(srid)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend_error)?;
            let geom_json: Option<String> = row.try_get("geom_json").map_err(backend_error)?;
            let distance_meters: Option<f64> = row.try_get("distance_m").map_err(backend_error)?;
            let geometry = match geom_json {
                Some(text) => Some(parse_geojson(&text)?),
                None => None,
            };
            features.push(NeighborFeature {
                id: Value::String(id),
                geometry,
                distance_meters,
            });
        }
        Ok(features)
    }

    async fn transform_crs(
        &self,
        geometry: &Value,
        from_epsg: i32,
        to_epsg: i32,
    ) -> Result<Value, BackendError> {
        let payload: Option<String> = sqlx::query_scalar(TRANSFORM_SQL)
            .bind(geometry.to_string())
            .bind(from_epsg)
            .bind(to_epsg)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        let geojson = payload.ok_or_else(|| {
            BackendError::BadInput("CRS transformation returned no geometry".into())
        })?;
        parse_geojson(&geojson)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

/// Quote a possibly schema-qualified identifier. The dispatcher's allow-list
/// already bounds what reaches here; this rejects anything that could not be
/// a plain identifier at all.
fn quote_ident(name: &str) -> Result<String, BackendError> {
    let mut quoted = Vec::new();
    for part in name.split('.') {
        if part.is_empty()
            || !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(BackendError::BadInput(format!("invalid identifier '{name}'")));
        }
        quoted.push(format!("\"{part}\""));
    }
    Ok(quoted.join("."))
}

fn parse_geojson(text: &str) -> Result<Value, BackendError> {
    serde_json::from_str(text)
        .map_err(|err| BackendError::Unavailable(format!("backend returned invalid GeoJSON: {err}")))
}

fn backend_error(err: sqlx::Error) -> BackendError {
    match err {
        // The engine parsed the request and refused it: bad geometry, bad
        // CRS, missing table. User-fixable.
        sqlx::Error::Database(db) => BackendError::BadInput(db.message().to_string()),
        sqlx::Error::RowNotFound => BackendError::BadInput("no rows returned".into()),
        other => BackendError::Unavailable(other.to_string()),
    }
}
