//! Upstream error and body types.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors talking to an upstream geo service.
///
/// URLs in these errors never contain userinfo.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// DNS, connect or transport failure.
    #[error("Request to {url} failed: {message}")]
    Network { url: String, message: String },

    /// Connect or read timeout expired.
    #[error("Request to {url} timed out after {secs} seconds")]
    Timeout { url: String, secs: u64 },

    /// The upstream request could not be constructed.
    #[error("Invalid upstream request: {0}")]
    InvalidRequest(String),

    /// The TLS connector could not be set up.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The response body stream was already handed out.
    #[error("Response body already taken")]
    BodyConsumed,

    /// The response was disposed before its body was read.
    #[error("Response already disposed")]
    Disposed,

    /// A buffered response exceeded the caller's size bound.
    #[error("Response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

impl UpstreamError {
    /// True for failures that mean the service is unreachable or slow.
    pub fn is_network(&self) -> bool {
        matches!(self, UpstreamError::Network { .. } | UpstreamError::Timeout { .. })
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// A response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, UpstreamResult<Bytes>>;
