//! Geo service proxy library.
//!
//! Relays WMS/WFS traffic for browser viewers, negotiates WFS output formats
//! from capabilities documents and prepares feature geometries for JSON
//! responses.

pub mod config;
pub mod forwarding;
pub mod geometry;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod ogc;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
