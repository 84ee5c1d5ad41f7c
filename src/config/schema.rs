//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::simplifier::DEFAULT_MAX_VERTICES;

/// Root configuration for the geo service proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration, inbound and upstream.
    pub timeouts: TimeoutConfig,

    /// Header allow-lists for both proxy directions.
    pub forwarding: ForwardingConfig,

    /// Response teeing settings.
    pub tee: TeeConfig,

    /// Geometry output budget.
    pub geometry: GeometryConfig,

    /// Additional reference system definitions.
    pub crs: CrsConfig,

    /// Size limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Geo services that may be proxied.
    pub services: Vec<ServiceConfig>,
}

impl ProxyConfig {
    /// Look up a configured service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream read timeout (status line and each body chunk) in seconds.
    pub read_secs: u64,

    /// Inbound request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            read_secs: 30,
            request_secs: 60,
        }
    }
}

/// Header allow-lists. Headers are never blanket-copied in either direction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Inbound request headers copied to the upstream request.
    pub request_headers: Vec<String>,

    /// Upstream response headers copied to the client response.
    pub response_headers: Vec<String>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            request_headers: [
                "Accept",
                "If-Modified-Since",
                "If-Unmodified-Since",
                "If-Match",
                "If-None-Match",
                "If-Range",
                "Range",
                "Referer",
                "User-Agent",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            response_headers: [
                "Content-Type",
                "Content-Length",
                "Content-Range",
                "Content-Disposition",
                "Cache-Control",
                "Expires",
                "Last-Modified",
                "ETag",
                "Pragma",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Response teeing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Response headers cached before the body is read, so they stay
    /// readable after the upstream response is disposed.
    pub cache_headers: Vec<String>,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            cache_headers: vec!["Content-Type".to_string(), "Content-Length".to_string()],
        }
    }
}

/// Geometry serialization budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Transport ceiling in bytes (maximum request/response size of the host).
    pub transport_max_bytes: usize,

    /// Safety margin subtracted from the transport ceiling.
    pub safety_margin_bytes: usize,

    /// Maximum number of vertices in a returned geometry.
    pub max_vertices: usize,

    /// Fixed precision scale (e.g. 1000 for millimetres in a metric CRS).
    /// Absent means floating precision.
    pub precision_scale: Option<f64>,
}

impl GeometryConfig {
    /// Byte budget for a single serialized geometry.
    pub fn max_bytes(&self) -> usize {
        self.transport_max_bytes.saturating_sub(self.safety_margin_bytes)
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            transport_max_bytes: 2 * 1024 * 1024, // 2MB
            safety_margin_bytes: 100 * 1024,
            max_vertices: DEFAULT_MAX_VERTICES,
            precision_scale: None,
        }
    }
}

/// Reference system definitions on top of the built-in EPSG table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CrsConfig {
    /// proj4 definitions keyed by code, e.g. `"EPSG:2056" = "+proj=somerc ..."`.
    pub definitions: BTreeMap<String, String>,
}

/// Size limits applied to inbound and buffered upstream bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,

    /// Maximum upstream body size buffered in memory (capabilities documents,
    /// service exception reports).
    pub max_upstream_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024,
            max_upstream_body_size: 16 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// OGC protocol spoken by a configured service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProtocol {
    Wms,
    Wfs,
}

impl ServiceProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceProtocol::Wms => "wms",
            ServiceProtocol::Wfs => "wfs",
        }
    }

    /// Parse the protocol segment of a proxy path (case-insensitive).
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "wms" => Some(ServiceProtocol::Wms),
            "wfs" => Some(ServiceProtocol::Wfs),
            _ => None,
        }
    }
}

/// A proxied geo service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service identifier, used in proxy paths.
    pub name: String,

    /// Service base URL, may contain vendor parameters.
    pub url: String,

    /// Protocol spoken by the service.
    pub protocol: ServiceProtocol,

    /// Whether clients may reach this service through the proxy.
    #[serde(default = "default_use_proxy")]
    pub use_proxy: bool,

    /// Optional HTTP Basic credentials, never sent to the client.
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
}

fn default_use_proxy() -> bool {
    true
}

/// HTTP Basic credentials for a service.
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthenticationConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthenticationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_budget() {
        let config = GeometryConfig::default();
        assert_eq!(config.max_bytes(), 2_097_152 - 102_400);
        assert_eq!(config.max_vertices, 600);
        assert!(config.precision_scale.is_none());
    }

    #[test]
    fn test_parse_services() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[services]]
            name = "osm"
            url = "https://example.com/wms?MAP=osm"
            protocol = "wms"

            [[services]]
            name = "roads"
            url = "https://example.com/wfs"
            protocol = "wfs"
            use_proxy = false
            authentication = { username = "user", password = "secret" }
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 2);
        let osm = config.service("osm").unwrap();
        assert_eq!(osm.protocol, ServiceProtocol::Wms);
        assert!(osm.use_proxy);
        assert!(osm.authentication.is_none());

        let roads = config.service("roads").unwrap();
        assert!(!roads.use_proxy);
        let debug = format!("{:?}", roads.authentication);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_parse_crs_definitions() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [crs.definitions]
            "EPSG:2056" = "+proj=somerc +ellps=bessel +units=m"
            "#,
        )
        .unwrap();
        assert_eq!(config.crs.definitions.len(), 1);
        assert!(config.crs.definitions["EPSG:2056"].starts_with("+proj=somerc"));
    }

    #[test]
    fn test_protocol_from_path() {
        assert_eq!(ServiceProtocol::from_path("WMS"), Some(ServiceProtocol::Wms));
        assert_eq!(ServiceProtocol::from_path("wfs"), Some(ServiceProtocol::Wfs));
        assert_eq!(ServiceProtocol::from_path("tiles3d"), None);
    }
}
