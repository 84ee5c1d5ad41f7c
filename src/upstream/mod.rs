//! Upstream HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → tee.rs (TeeingHttpClient wraps the response)
//!     → transport.rs (hyper client, timeouts, TLS)
//!     → redirect.rs (which 3xx to follow, credential stripping)
//!     → TeeResponse (body stream + in-memory copy + cached headers)
//! ```

pub mod redirect;
pub mod tee;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use tee::{RequestObserver, TeeHandle, TeeResponse, TeeingHttpClient};
pub use transport::{charset_of, read_to_end, HttpTransport, HyperTransport, UpstreamResponse};
pub use types::{BodyStream, UpstreamError, UpstreamResult};
