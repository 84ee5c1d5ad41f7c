//! HTTP transport abstraction and the hyper-based implementation.
//!
//! # Responsibilities
//! - Define the `HttpTransport` / `UpstreamResponse` seam the tee wraps
//! - Issue requests over HTTP and HTTPS with connect and read timeouts
//! - Follow upstream redirects (see `redirect.rs`)
//! - Expose response bodies as chunk streams
//!
//! # Design Decisions
//! - Timeouts are configuration the caller controls; expiry is a network error
//! - A disposed response drops its connection and answers no header lookups

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::config::TimeoutConfig;
use crate::forwarding::{ProxyRequest, FORM_URLENCODED};
use crate::observability::logging::redact_url;
use crate::upstream::redirect::{is_same_origin, next_step, strip_credentials, RedirectStep};
use crate::upstream::types::{BodyStream, UpstreamError, UpstreamResult};

/// A client able to issue upstream GET and POST requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> UpstreamResult<Box<dyn UpstreamResponse>>;

    async fn post(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        content_type: &str,
    ) -> UpstreamResult<Box<dyn UpstreamResponse>>;

    /// Send a prepared request, dispatching on its method.
    async fn execute(&self, request: &ProxyRequest) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        match request.body() {
            Some(body) if *request.method() == Method::POST => {
                let content_type = request.content_type().unwrap_or(FORM_URLENCODED);
                self.post(request.uri(), request.headers(), body.clone(), content_type)
                    .await
            }
            _ => self.get(request.uri(), request.headers()).await,
        }
    }
}

/// A response from an upstream service.
pub trait UpstreamResponse: Send {
    fn status(&self) -> StatusCode;

    /// Value of a response header (case-insensitive name).
    fn header(&self, name: &str) -> Option<String>;

    /// Every value of a response header, in received order.
    fn header_all(&self, name: &str) -> Vec<String> {
        self.header(name).into_iter().collect()
    }

    fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// The `charset` parameter of the content type, if any.
    fn charset(&self) -> Option<String> {
        self.content_type().and_then(|ct| charset_of(&ct))
    }

    /// Hand out the body stream. Can be called once.
    fn take_body(&mut self) -> UpstreamResult<BodyStream>;

    /// Release the underlying connection.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Extract the charset parameter from a content type value.
pub fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// Drain a body stream into memory, failing once more than `limit` bytes arrive.
pub async fn read_to_end(mut body: BodyStream, limit: usize, url: &Url) -> UpstreamResult<Bytes> {
    let mut buffer = Vec::new();
    while let Some(chunk) = body.try_next().await? {
        if buffer.len() + chunk.len() > limit {
            return Err(UpstreamError::TooLarge {
                url: redact_url(url),
                limit,
            });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Upstream transport on the hyper-util pooled client.
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HyperTransport {
    /// Build the pooled client. Fails when the TLS provider cannot be set up.
    pub fn new(timeouts: &TimeoutConfig) -> UpstreamResult<Self> {
        let connect_timeout = Duration::from_secs(timeouts.connect_secs);
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(connect_timeout));
        http.enforce_http(false);

        // More than one rustls provider is compiled in; pick one explicitly.
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| UpstreamError::Tls(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            client,
            connect_timeout,
            read_timeout: Duration::from_secs(timeouts.read_secs),
        })
    }

    /// Send a GET, or a POST when `payload` is set, following redirects.
    async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        mut payload: Option<(Bytes, &str)>,
    ) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        let mut current = url.clone();
        let mut headers = headers.clone();
        let mut hops = 0;

        loop {
            let request = match &payload {
                Some((body, content_type)) => post_request(&current, &headers, body.clone(), content_type)?,
                None => build_request(Method::GET, &current, &headers, Body::empty())?,
            };
            let mut response = self.send(request, &current).await?;

            let location = response.header(header::LOCATION.as_str());
            let (target, keep_body) = match next_step(response.status(), location.as_deref(), &current, hops) {
                RedirectStep::Stop => return Ok(response),
                RedirectStep::Follow { target, keep_body } => (target, keep_body),
            };

            tracing::debug!(
                from = %redact_url(&current),
                to = %redact_url(&target),
                status = response.status().as_u16(),
                "Following upstream redirect"
            );
            response.dispose();
            if !is_same_origin(url, &target) {
                strip_credentials(&mut headers);
            }
            if !keep_body {
                payload = None;
            }
            hops += 1;
            current = target;
        }
    }

    async fn send(&self, request: Request<Body>, url: &Url) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        let redacted = redact_url(url);
        tracing::debug!(upstream = %redacted, method = %request.method(), "Sending upstream request");

        let response = match tokio::time::timeout(self.read_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let message = error_chain(&e);
                let secs = self.connect_timeout.as_secs();
                if message.contains("timed out") || message.contains("timeout") {
                    return Err(UpstreamError::Timeout { url: redacted, secs });
                }
                return Err(UpstreamError::Network { url: redacted, message });
            }
            Err(_) => {
                return Err(UpstreamError::Timeout {
                    url: redacted,
                    secs: self.read_timeout.as_secs(),
                })
            }
        };

        let (parts, body) = response.into_parts();
        Ok(Box::new(HyperResponse {
            url: redacted,
            status: parts.status,
            headers: Some(parts.headers),
            body: Some(body),
            read_timeout: self.read_timeout,
            disposed: false,
        }))
    }
}

fn build_request(
    method: Method,
    url: &Url,
    headers: &HeaderMap,
    body: Body,
) -> UpstreamResult<Request<Body>> {
    let mut request = Request::builder()
        .method(method)
        .uri(url.as_str())
        .body(body)
        .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
    request.headers_mut().extend(headers.clone());
    Ok(request)
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn post_request(url: &Url, headers: &HeaderMap, body: Bytes, content_type: &str) -> UpstreamResult<Request<Body>> {
    let mut request = build_request(Method::POST, url, headers, Body::from(body))?;
    let content_type = content_type
        .parse::<HeaderValue>()
        .map_err(|_| UpstreamError::InvalidRequest(format!("bad content type '{}'", content_type)))?;
    request.headers_mut().insert(header::CONTENT_TYPE, content_type);
    Ok(request)
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        self.fetch(url, headers, None).await
    }

    async fn post(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        content_type: &str,
    ) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        self.fetch(url, headers, Some((body, content_type))).await
    }
}

/// Response received through `HyperTransport`.
struct HyperResponse {
    url: String,
    status: StatusCode,
    headers: Option<HeaderMap>,
    body: Option<Incoming>,
    read_timeout: Duration,
    disposed: bool,
}

impl UpstreamResponse for HyperResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .as_ref()?
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn header_all(&self, name: &str) -> Vec<String> {
        let Some(headers) = self.headers.as_ref() else {
            return Vec::new();
        };
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    fn take_body(&mut self) -> UpstreamResult<BodyStream> {
        if self.disposed {
            return Err(UpstreamError::Disposed);
        }
        let body = self.body.take().ok_or(UpstreamError::BodyConsumed)?;
        let chunks = Body::new(body).into_data_stream().boxed();
        let url = self.url.clone();
        let read_timeout = self.read_timeout;

        // Each chunk gets its own read deadline; the stream ends after the first error.
        let stream = stream::unfold(Some(chunks), move |state| {
            let url = url.clone();
            async move {
                let mut chunks = state?;
                match tokio::time::timeout(read_timeout, chunks.next()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(chunks))),
                    Ok(Some(Err(e))) => Some((
                        Err(UpstreamError::Network {
                            url,
                            message: e.to_string(),
                        }),
                        None,
                    )),
                    Ok(None) => None,
                    Err(_) => Some((
                        Err(UpstreamError::Timeout {
                            url,
                            secs: read_timeout.as_secs(),
                        }),
                        None,
                    )),
                }
            }
        });
        Ok(stream.boxed())
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.body = None;
        self.headers = None;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
