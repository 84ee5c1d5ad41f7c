//! OGC protocol helpers.
//!
//! # Data Flow
//! ```text
//! service URL + type name
//!     → request.rs (GetCapabilities URL)
//!     → TeeingHttpClient (fetch, teed copy)
//!     → capabilities.rs (version-aware parse, output format tiers)
//!     → OutputFormatResult
//!
//! WMS error response body → exception.rs → one-line message or None
//! ```

pub mod capabilities;
pub mod exception;
pub mod request;

pub use capabilities::{
    CapabilitiesDocument, CapabilitiesError, CapabilitiesNegotiator, CapabilitiesResult,
    FormatSource, Namespaces, OutputFormatResult, DEFAULT_WFS_VERSION,
};
pub use exception::{is_exception_content_type, service_exception_message};
pub use request::ogc_request_url;
