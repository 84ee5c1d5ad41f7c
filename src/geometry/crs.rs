//! Reference system decoding and transform selection.
//!
//! Transforms are only produced when the data source and viewer reference
//! systems differ in definition; labels and metadata do not count. Each
//! direction is a separate query.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use geo::{Coord, Geometry, MapCoords};
use proj4rs::Proj;
use thiserror::Error;

/// Errors decoding reference systems or transforming coordinates.
#[derive(Debug, Error)]
pub enum CrsError {
    /// Unknown or malformed reference system code.
    #[error("Cannot decode reference system '{code}': {message}")]
    Decode { code: String, message: String },

    /// A coordinate could not be transformed.
    #[error("Coordinate transform failed: {0}")]
    Transform(String),
}

pub type CrsResult<T> = Result<T, CrsError>;

/// Source of reference system definitions.
pub trait CrsRegistry: Send + Sync {
    fn decode(&self, code: &str) -> CrsResult<ReferenceSystem>;
}

/// proj4 parameters that describe the string rather than the system.
const METADATA_PARAMS: [&str; 4] = ["no_defs", "type", "wktext", "title"];

/// A decoded coordinate reference system.
#[derive(Clone)]
pub struct ReferenceSystem {
    code: String,
    definition: String,
    proj: Arc<Proj>,
}

impl ReferenceSystem {
    /// Build from a proj4 definition string.
    pub fn from_definition(code: impl Into<String>, definition: &str) -> CrsResult<Self> {
        let code = code.into();
        let proj = Proj::from_proj_string(definition).map_err(|e| CrsError::Decode {
            code: code.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            code,
            definition: definition.to_string(),
            proj: Arc::new(proj),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Longitude/latitude system (degrees on the wire).
    pub fn is_geographic(&self) -> bool {
        self.proj.is_latlong()
    }

    /// Equal when the definitions describe the same system, whatever the code.
    pub fn equals_ignore_metadata(&self, other: &ReferenceSystem) -> bool {
        normalized_params(&self.definition) == normalized_params(&other.definition)
    }
}

impl std::fmt::Debug for ReferenceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSystem")
            .field("code", &self.code)
            .field("definition", &self.definition)
            .finish()
    }
}

fn normalized_params(definition: &str) -> BTreeMap<String, Option<String>> {
    definition
        .split_whitespace()
        .map(|token| token.trim_start_matches('+'))
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_ascii_lowercase(), Some(value.to_string())),
            None => (token.to_ascii_lowercase(), None),
        })
        .filter(|(key, _)| !METADATA_PARAMS.contains(&key.as_str()))
        .map(|(key, value)| {
            let value = value.map(|v| normalize_value(&key, &v));
            (key, value)
        })
        .collect()
}

fn normalize_value(key: &str, value: &str) -> String {
    if key == "proj" && matches!(value, "latlong" | "lonlat" | "latlon") {
        return "longlat".to_string();
    }
    value
        .split(',')
        .map(|part| match part.trim().parse::<f64>() {
            Ok(number) => number.to_string(),
            Err(_) => part.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract the EPSG number from `EPSG:n`, `urn:ogc:def:crs:EPSG::n`,
/// `http://www.opengis.net/def/crs/EPSG/0/n` or `CRS:84`.
pub fn parse_epsg_code(code: &str) -> Option<u32> {
    let code = code.trim();
    if code.eq_ignore_ascii_case("CRS:84") || code.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84") {
        return Some(4326);
    }
    let upper = code.to_ascii_uppercase();
    let number = if let Some(rest) = upper.strip_prefix("EPSG:") {
        rest
    } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
        upper.rsplit(':').next()?
    } else if upper.contains("/DEF/CRS/EPSG/") {
        upper.rsplit('/').next()?
    } else {
        return None;
    };
    number.parse().ok()
}

/// Definitions available without configuration.
const BUILTIN_DEFINITIONS: [(u32, &str); 9] = [
    (4326, "+proj=longlat +datum=WGS84 +no_defs"),
    (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (
        3857,
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs",
    ),
    (
        28992,
        "+proj=sterea +lat_0=52.1561605555556 +lon_0=5.38763888888889 +k=0.9999079 +x_0=155000 +y_0=463000 +ellps=bessel +towgs84=565.417,50.3319,465.552,-0.398957,0.343988,-1.8774,4.0725 +units=m +no_defs",
    ),
    (
        31370,
        "+proj=lcc +lat_0=90 +lon_0=4.36748666666667 +lat_1=51.1666672333333 +lat_2=49.8333339 +x_0=150000.013 +y_0=5400088.438 +ellps=intl +towgs84=-106.8686,52.2978,-103.7239,0.3366,-0.457,1.8422,-1.2747 +units=m +no_defs",
    ),
    (25831, "+proj=utm +zone=31 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (25832, "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (25833, "+proj=utm +zone=33 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (
        3035,
        "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
];

/// Registry of EPSG codes backed by proj4 definitions.
#[derive(Debug, Clone)]
pub struct EpsgRegistry {
    definitions: HashMap<u32, String>,
}

impl EpsgRegistry {
    pub fn new() -> Self {
        Self {
            definitions: BUILTIN_DEFINITIONS
                .iter()
                .map(|(code, definition)| (*code, definition.to_string()))
                .collect(),
        }
    }

    /// Built-in definitions plus configured ones, which take precedence.
    pub fn with_definitions(extra: &BTreeMap<String, String>) -> CrsResult<Self> {
        let mut registry = Self::new();
        for (code, definition) in extra {
            let epsg = parse_epsg_code(code).ok_or_else(|| CrsError::Decode {
                code: code.clone(),
                message: "not an EPSG code".to_string(),
            })?;
            // Fail at startup rather than on the first request.
            ReferenceSystem::from_definition(code.clone(), definition)?;
            registry.register(epsg, definition.clone());
        }
        Ok(registry)
    }

    pub fn register(&mut self, epsg: u32, definition: impl Into<String>) {
        self.definitions.insert(epsg, definition.into());
    }
}

impl Default for EpsgRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CrsRegistry for EpsgRegistry {
    fn decode(&self, code: &str) -> CrsResult<ReferenceSystem> {
        let epsg = parse_epsg_code(code).ok_or_else(|| CrsError::Decode {
            code: code.to_string(),
            message: "unrecognised code format".to_string(),
        })?;
        let definition = self.definitions.get(&epsg).ok_or_else(|| CrsError::Decode {
            code: code.to_string(),
            message: format!("no definition for EPSG:{}", epsg),
        })?;
        ReferenceSystem::from_definition(format!("EPSG:{}", epsg), definition)
    }
}

/// A one-directional coordinate transform.
#[derive(Debug, Clone)]
pub struct CrsTransform {
    source: ReferenceSystem,
    target: ReferenceSystem,
}

impl CrsTransform {
    pub fn new(source: ReferenceSystem, target: ReferenceSystem) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> &ReferenceSystem {
        &self.source
    }

    pub fn target(&self) -> &ReferenceSystem {
        &self.target
    }

    /// Transform every coordinate. x is easting or longitude.
    pub fn apply(&self, geometry: &Geometry) -> CrsResult<Geometry> {
        let (src, dst) = (self.source.proj.as_ref(), self.target.proj.as_ref());
        let (src_degrees, dst_degrees) = (src.is_latlong(), dst.is_latlong());

        geometry.try_map_coords(|c: Coord| {
            let mut point = if src_degrees {
                (c.x.to_radians(), c.y.to_radians())
            } else {
                (c.x, c.y)
            };
            proj4rs::transform::transform(src, dst, &mut point)
                .map_err(|e| CrsError::Transform(e.to_string()))?;
            Ok(if dst_degrees {
                Coord {
                    x: point.0.to_degrees(),
                    y: point.1.to_degrees(),
                }
            } else {
                Coord {
                    x: point.0,
                    y: point.1,
                }
            })
        })
    }
}

/// Apply an optional transform; `None` is the identity.
pub fn apply_optional(transform: Option<&CrsTransform>, geometry: &Geometry) -> CrsResult<Geometry> {
    match transform {
        Some(transform) => transform.apply(geometry),
        None => Ok(geometry.clone()),
    }
}

/// Transforms for one (data source, viewer) reference system combination.
///
/// Both directions are `None` when the systems are equal.
#[derive(Debug, Clone, Default)]
pub struct TransformPair {
    pub forward: Option<CrsTransform>,
    pub inverse: Option<CrsTransform>,
}

impl TransformPair {
    pub fn is_noop(&self) -> bool {
        self.forward.is_none() && self.inverse.is_none()
    }
}

/// Decides per request whether reprojection is needed.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSystemResolver<R = EpsgRegistry> {
    registry: R,
}

impl<R: CrsRegistry> ReferenceSystemResolver<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Both directions between `source` and `target`.
    pub fn resolve_transform(&self, source: &str, target: &str) -> CrsResult<TransformPair> {
        let (source, target) = self.decode_pair(source, target)?;
        if source.equals_ignore_metadata(&target) {
            return Ok(TransformPair::default());
        }
        Ok(TransformPair {
            forward: Some(CrsTransform::new(source.clone(), target.clone())),
            inverse: Some(CrsTransform::new(target, source)),
        })
    }

    /// Transform from the data source system to the viewer system, if needed.
    pub fn to_target(&self, source: &str, target: &str) -> CrsResult<Option<CrsTransform>> {
        let (source, target) = self.decode_pair(source, target)?;
        Ok(Self::transform_between(source, target))
    }

    /// Transform from the viewer system back to the data source system, if needed.
    pub fn to_source(&self, source: &str, target: &str) -> CrsResult<Option<CrsTransform>> {
        let (source, target) = self.decode_pair(source, target)?;
        Ok(Self::transform_between(target, source))
    }

    fn decode_pair(&self, source: &str, target: &str) -> CrsResult<(ReferenceSystem, ReferenceSystem)> {
        Ok((self.registry.decode(source)?, self.registry.decode(target)?))
    }

    fn transform_between(from: ReferenceSystem, to: ReferenceSystem) -> Option<CrsTransform> {
        if from.equals_ignore_metadata(&to) {
            tracing::trace!(crs = %from.code(), "Reference systems equal, no transform");
            return None;
        }
        tracing::debug!(from = %from.code(), to = %to.code(), "Reference systems differ");
        Some(CrsTransform::new(from, to))
    }
}
