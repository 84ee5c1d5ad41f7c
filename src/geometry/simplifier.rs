//! Size-bounded geometry serialization.
//!
//! A geometry returned to a viewer is embedded as WKT in a JSON body that has
//! to fit the host's maximum message size. `simplify` trades detail for size:
//!
//! ```text
//! reduce precision → capture envelope → measure
//!     ↓ over budget (bytes or vertices) and tolerance < 9999
//! topology-preserving simplify(tolerance) → reduce precision → measure
//!     tolerance × 10 (1, 10, 100, 1000)
//!     ↓ tolerance ran past the ceiling
//! envelope WKT
//! ```
//!
//! The result is lossy. Only geometries that fit on the first measurement come
//! back unchanged (apart from precision reduction).

use geo::{
    BoundingRect, Coord, CoordsIter, Geometry, GeometryCollection, LineString, MapCoords, Point,
    Polygon, SimplifyVwPreserve,
};
use wkt::ToWkt;

use crate::config::GeometryConfig;
use crate::observability::metrics::record_geometry_simplification;

/// First tolerance tried.
pub const INITIAL_TOLERANCE: f64 = 1.0;

/// The loop stops once the tolerance reaches this value.
pub const TOLERANCE_CEILING: f64 = 9999.0;

const TOLERANCE_FACTOR: f64 = 10.0;

/// Default vertex cap for returned geometries.
pub const DEFAULT_MAX_VERTICES: usize = 600;

/// Grid that coordinates are snapped to.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PrecisionModel {
    /// Full double precision, no snapping.
    #[default]
    Floating,
    /// Coordinates are rounded to multiples of `1 / scale`.
    Fixed { scale: f64 },
}

impl PrecisionModel {
    pub fn from_scale(scale: Option<f64>) -> Self {
        match scale {
            Some(scale) if scale > 0.0 => PrecisionModel::Fixed { scale },
            _ => PrecisionModel::Floating,
        }
    }

    /// Snap a single ordinate to the grid.
    pub fn make_precise(&self, value: f64) -> f64 {
        match self {
            PrecisionModel::Floating => value,
            // Half-up rounding.
            PrecisionModel::Fixed { scale } => (value * scale + 0.5).floor() / scale,
        }
    }

    /// A copy of `geometry` with every coordinate snapped to the grid.
    pub fn reduce(&self, geometry: &Geometry) -> Geometry {
        match self {
            PrecisionModel::Floating => geometry.clone(),
            PrecisionModel::Fixed { .. } => geometry.map_coords(|c| Coord {
                x: self.make_precise(c.x),
                y: self.make_precise(c.y),
            }),
        }
    }
}

/// Output limits for one serialized geometry. Constant per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBudget {
    pub max_bytes: usize,
    pub max_vertices: usize,
}

impl GeometryBudget {
    pub fn new(max_bytes: usize, max_vertices: usize) -> Self {
        Self {
            max_bytes,
            max_vertices,
        }
    }

    pub fn from_config(config: &GeometryConfig) -> Self {
        Self::new(config.max_bytes(), config.max_vertices)
    }
}

impl Default for GeometryBudget {
    fn default() -> Self {
        Self::from_config(&GeometryConfig::default())
    }
}

/// One point on the simplification ladder.
///
/// Each `step` consumes the state and returns the next one; nothing is
/// mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplificationState {
    pub geometry: Geometry,
    /// Tolerance the next step will use.
    pub tolerance: f64,
    pub wkt: String,
    pub byte_len: usize,
    pub vertex_count: usize,
}

impl SimplificationState {
    pub fn measure(geometry: Geometry, tolerance: f64) -> Self {
        let wkt = geometry.wkt_string();
        Self {
            byte_len: wkt.len(),
            vertex_count: geometry.coords_count(),
            wkt,
            geometry,
            tolerance,
        }
    }

    pub fn exceeds(&self, budget: &GeometryBudget) -> bool {
        self.byte_len > budget.max_bytes || self.vertex_count > budget.max_vertices
    }

    pub fn can_continue(&self) -> bool {
        self.tolerance < TOLERANCE_CEILING
    }

    /// Simplify at the current tolerance, re-snap, re-measure.
    pub fn step(self, precision: &PrecisionModel) -> Self {
        let simplified = simplify_preserving_topology(&self.geometry, self.tolerance);
        let reduced = precision.reduce(&simplified);
        Self::measure(reduced, self.tolerance * TOLERANCE_FACTOR)
    }
}

/// Serialize `geometry` as WKT within `budget`. Never fails.
///
/// Returns the envelope of the (precision-reduced) input when the tolerance
/// ladder is exhausted.
pub fn simplify(geometry: &Geometry, precision: &PrecisionModel, budget: &GeometryBudget) -> String {
    let reduced = precision.reduce(geometry);
    let fallback = envelope_wkt(&reduced);

    let mut state = SimplificationState::measure(reduced, INITIAL_TOLERANCE);
    let mut passes = 0;
    while state.exceeds(budget) && state.can_continue() {
        tracing::debug!(
            tolerance = state.tolerance,
            bytes = state.byte_len,
            vertices = state.vertex_count,
            "Simplifying geometry"
        );
        state = state.step(precision);
        passes += 1;
    }

    if state.tolerance > TOLERANCE_CEILING {
        tracing::debug!("Maximum number of simplify passes reached, returning envelope");
        record_geometry_simplification("envelope");
        return fallback;
    }

    record_geometry_simplification(if passes == 0 { "unchanged" } else { "simplified" });
    canonicalize_wkt(state.wkt)
}

/// Topology-preserving simplification with area threshold `tolerance²`.
///
/// This is Visvalingam-Whyatt, not Douglas-Peucker: `tolerance` is squared
/// into a triangle-area threshold rather than used as a distance. A vertex
/// removed at a given step is therefore not the same vertex a distance-based
/// simplifier would drop, and results differ from a Douglas-Peucker pass with
/// the same tolerance. The tolerance ladder itself is unaffected.
///
/// Points and single segments have nothing to remove and are returned as is.
pub fn simplify_preserving_topology(geometry: &Geometry, tolerance: f64) -> Geometry {
    let epsilon = tolerance * tolerance;
    match geometry {
        Geometry::LineString(g) => Geometry::LineString(g.simplify_vw_preserve(&epsilon)),
        Geometry::MultiLineString(g) => Geometry::MultiLineString(g.simplify_vw_preserve(&epsilon)),
        Geometry::Polygon(g) => Geometry::Polygon(g.simplify_vw_preserve(&epsilon)),
        Geometry::MultiPolygon(g) => Geometry::MultiPolygon(g.simplify_vw_preserve(&epsilon)),
        Geometry::Rect(g) => Geometry::Polygon(g.to_polygon().simplify_vw_preserve(&epsilon)),
        Geometry::Triangle(g) => Geometry::Polygon(g.to_polygon().simplify_vw_preserve(&epsilon)),
        Geometry::GeometryCollection(collection) => Geometry::GeometryCollection(GeometryCollection(
            collection
                .0
                .iter()
                .map(|g| simplify_preserving_topology(g, tolerance))
                .collect(),
        )),
        Geometry::Point(_) | Geometry::MultiPoint(_) | Geometry::Line(_) => geometry.clone(),
    }
}

/// The bounding box as a geometry: a point when it has no extent, a
/// two-point line when one side is zero, otherwise a closed polygon.
pub fn envelope(geometry: &Geometry) -> Option<Geometry> {
    let rect = geometry.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());

    let envelope = if min.x == max.x && min.y == max.y {
        Geometry::Point(Point::from(min))
    } else if min.x == max.x || min.y == max.y {
        Geometry::LineString(LineString::from(vec![min, max]))
    } else {
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (min.x, min.y),
                (min.x, max.y),
                (max.x, max.y),
                (max.x, min.y),
                (min.x, min.y),
            ]),
            vec![],
        ))
    };
    Some(envelope)
}

/// WKT of the envelope; an empty geometry has the empty point as envelope.
pub fn envelope_wkt(geometry: &Geometry) -> String {
    match envelope(geometry) {
        Some(envelope) => envelope.wkt_string(),
        None => "POINT EMPTY".to_string(),
    }
}

/// Rewrite a leading `LINEARRING` tag to `LINESTRING`.
pub fn canonicalize_wkt(wkt: String) -> String {
    const LINEARRING: &str = "LINEARRING";
    match wkt.get(..LINEARRING.len()) {
        Some(tag) if tag.eq_ignore_ascii_case(LINEARRING) => {
            format!("LINESTRING{}", &wkt[LINEARRING.len()..])
        }
        _ => wkt,
    }
}
