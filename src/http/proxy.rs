//! The proxy endpoint.
//!
//! # Responsibilities
//! - Issue exactly one upstream request per client request (no retry, no cache)
//! - Copy allow-listed response headers only
//! - Stream the upstream body back unchanged
//! - Log WMS service exception messages
//!
//! # Design Decisions
//! - Regular responses stream straight from the transport; only exception
//!   reports are teed, drained within `max_buffered` and replayed from memory

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::stream::{self, StreamExt};
use url::Url;

use crate::config::ServiceProtocol;
use crate::forwarding::{
    parse_allow_list, passthrough_response_headers, Credentials, HeaderForwarder, InboundRequest,
};
use crate::observability::logging::redact_url;
use crate::observability::metrics::record_upstream_request;
use crate::ogc::{is_exception_content_type, service_exception_message};
use crate::upstream::{
    read_to_end, BodyStream, HttpTransport, TeeingHttpClient, UpstreamResponse, UpstreamResult,
};

/// Status, allow-listed headers and body of a proxied response.
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for ProxiedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Relays client requests to a geo service.
pub struct ProxyEndpoint<T> {
    client: Arc<TeeingHttpClient<T>>,
    forwarder: HeaderForwarder,
    response_headers: Vec<HeaderName>,
    max_buffered: usize,
}

impl<T: HttpTransport> ProxyEndpoint<T> {
    pub fn new(
        client: Arc<TeeingHttpClient<T>>,
        forwarder: HeaderForwarder,
        response_headers: &[String],
        max_buffered: usize,
    ) -> Self {
        Self {
            client,
            forwarder,
            response_headers: parse_allow_list(response_headers),
            max_buffered,
        }
    }

    /// Forward `inbound` to `upstream_url` and hand back what the service sent.
    ///
    /// Upstream HTTP error statuses are returned as responses; only failures
    /// to get a response at all are errors.
    pub async fn proxy(
        &self,
        inbound: &InboundRequest,
        upstream_url: Url,
        credentials: Option<&Credentials>,
        protocol: ServiceProtocol,
    ) -> UpstreamResult<ProxiedResponse> {
        let request = self.forwarder.forward(inbound, upstream_url, credentials);
        let redacted = redact_url(request.uri());
        let start = Instant::now();

        let mut response = match self.client.inner().execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                record_upstream_request(protocol.as_str(), 0, start);
                tracing::warn!(upstream = %redacted, error = %e, "Upstream request failed");
                return Err(e);
            }
        };

        let status = response.status();
        record_upstream_request(protocol.as_str(), status.as_u16(), start);
        tracing::debug!(
            upstream = %redacted,
            method = %request.method(),
            status = status.as_u16(),
            "Upstream responded"
        );

        let headers = passthrough_response_headers(|name| response.header_all(name), &self.response_headers);

        let is_exception = protocol == ServiceProtocol::Wms
            && response
                .content_type()
                .map(|ct| is_exception_content_type(&ct))
                .unwrap_or(false);

        let body = if is_exception {
            self.drain_exception(request.uri(), response).await?
        } else {
            response.take_body()?
        };

        Ok(ProxiedResponse { status, headers, body })
    }

    async fn drain_exception(
        &self,
        url: &Url,
        response: Box<dyn UpstreamResponse>,
    ) -> UpstreamResult<BodyStream> {
        let mut teed = self.client.tee(url, response);
        let read = read_to_end(teed.take_body()?, self.max_buffered, url).await;
        teed.dispose();
        read?;

        let copy = teed.copy();
        match service_exception_message(&copy) {
            Some(message) => {
                tracing::warn!(upstream = %redact_url(url), exception = %message, "WMS service exception")
            }
            None => tracing::debug!(upstream = %redact_url(url), "XML response without exception report"),
        }
        Ok(stream::once(async move { Ok(copy) }).boxed())
    }
}
