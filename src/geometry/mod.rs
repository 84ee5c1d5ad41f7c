//! Geometry subsystem.
//!
//! # Data Flow
//! ```text
//! WKT from a feature source
//!     → processor.rs (parse)
//!     → crs.rs (transform, only when reference systems differ)
//!     → simplifier.rs (precision, tolerance ladder, envelope fallback)
//!     → canonical 2D WKT for the JSON response
//! ```

pub mod crs;
pub mod processor;
pub mod simplifier;

pub use crs::{
    apply_optional, parse_epsg_code, CrsError, CrsRegistry, CrsResult, CrsTransform, EpsgRegistry,
    ReferenceSystem, ReferenceSystemResolver, TransformPair,
};
pub use processor::{linearize_to_wkt, parse_wkt, GeometryError, GeometryProcessor, GeometryResult};
pub use simplifier::{
    canonicalize_wkt, envelope, envelope_wkt, simplify, GeometryBudget, PrecisionModel,
    SimplificationState,
};
