//! Geometry preparation for viewer responses: reproject, then simplify or
//! linearize to canonical WKT.

use geo::Geometry;
use thiserror::Error;
use wkt::{ToWkt, TryFromWkt};

use crate::config::GeometryConfig;
use crate::geometry::crs::{CrsError, CrsTransform};
use crate::geometry::simplifier::{canonicalize_wkt, simplify, GeometryBudget, PrecisionModel};

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Invalid WKT: {0}")]
    Parse(String),

    #[error(transparent)]
    Crs(#[from] CrsError),
}

pub type GeometryResult<T> = Result<T, GeometryError>;

/// Parse WKT text, accepting the `LINEARRING` tag.
pub fn parse_wkt(text: &str) -> GeometryResult<Geometry> {
    let text = canonicalize_wkt(text.trim().to_string());
    Geometry::try_from_wkt_str(&text).map_err(|e| GeometryError::Parse(e.to_string()))
}

/// 2D WKT without vendor tags.
pub fn linearize_to_wkt(geometry: &Geometry) -> String {
    canonicalize_wkt(geometry.wkt_string())
}

/// Apply `transform` when present. A failed transform leaves the geometry
/// as it was.
pub fn transform_geometry(geometry: Geometry, transform: Option<&CrsTransform>) -> Geometry {
    let Some(transform) = transform else {
        return geometry;
    };
    match transform.apply(&geometry) {
        Ok(transformed) => transformed,
        Err(e) => {
            tracing::error!(
                error = %e,
                from = %transform.source().code(),
                to = %transform.target().code(),
                "Failed to transform geometry"
            );
            geometry
        }
    }
}

/// Prepares geometries for embedding in JSON responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryProcessor {
    precision: PrecisionModel,
    budget: GeometryBudget,
}

impl GeometryProcessor {
    pub fn new(precision: PrecisionModel, budget: GeometryBudget) -> Self {
        Self { precision, budget }
    }

    pub fn from_config(config: &GeometryConfig) -> Self {
        Self::new(
            PrecisionModel::from_scale(config.precision_scale),
            GeometryBudget::from_config(config),
        )
    }

    pub fn budget(&self) -> &GeometryBudget {
        &self.budget
    }

    pub fn process(&self, geometry: Geometry, simplify_geometry: bool, transform: Option<&CrsTransform>) -> String {
        let geometry = transform_geometry(geometry, transform);
        if simplify_geometry {
            simplify(&geometry, &self.precision, &self.budget)
        } else {
            linearize_to_wkt(&geometry)
        }
    }

    pub fn process_wkt(
        &self,
        text: &str,
        simplify_geometry: bool,
        transform: Option<&CrsTransform>,
    ) -> GeometryResult<String> {
        let geometry = parse_wkt(text)?;
        Ok(self.process(geometry, simplify_geometry, transform))
    }
}
