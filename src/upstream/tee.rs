//! Response teeing client.
//!
//! Wraps any `HttpTransport` so every response body is duplicated into memory
//! as it is read. Code that consumes and disposes the response (a parser, the
//! client connection) does not prevent us from looking at the bytes and at a
//! configured set of headers afterwards.
//!
//! # Lifecycle of a tee record
//! ```text
//! request issued        → TeeRecord created, empty
//! take_body()           → configured headers cached (once), stream handed out
//! stream polled         → each chunk appended to the copy
//! dispose()             → flag set, inner response disposed, copy kept
//! ```
//!
//! Memory grows with the response size; callers bound what they read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use url::Url;

use crate::forwarding::ProxyRequest;
use crate::upstream::transport::{HttpTransport, UpstreamResponse};
use crate::upstream::types::{BodyStream, UpstreamResult};

/// Observer called with the URL and tee of every response.
pub type RequestObserver = Arc<dyn Fn(&Url, &TeeHandle) + Send + Sync>;

/// Captured state of one teed response.
#[derive(Debug, Default)]
struct TeeRecord {
    copy: Mutex<Vec<u8>>,
    cached_headers: OnceLock<HashMap<String, Option<String>>>,
    disposed: AtomicBool,
}

impl TeeRecord {
    fn append(&self, chunk: &[u8]) {
        self.copy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(chunk);
    }

    fn snapshot(&self) -> Bytes {
        let copy = self.copy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Bytes::copy_from_slice(&copy)
    }

    fn cached(&self, name: &str) -> Option<&Option<String>> {
        self.cached_headers.get()?.get(&name.to_ascii_lowercase())
    }
}

/// Read-only view of a teed response, handed to observers.
#[derive(Debug, Clone)]
pub struct TeeHandle {
    record: Arc<TeeRecord>,
}

impl TeeHandle {
    /// Bytes read from the body so far.
    pub fn copy(&self) -> Bytes {
        self.record.snapshot()
    }

    /// A header captured before the body was read.
    pub fn cached_header(&self, name: &str) -> Option<String> {
        self.record.cached(name).cloned().flatten()
    }

    pub fn is_disposed(&self) -> bool {
        self.record.disposed.load(Ordering::Acquire)
    }
}

/// A response whose body is duplicated into memory as it is read.
pub struct TeeResponse {
    inner: Box<dyn UpstreamResponse>,
    record: Arc<TeeRecord>,
    headers_to_cache: Arc<[String]>,
}

impl TeeResponse {
    fn new(inner: Box<dyn UpstreamResponse>, headers_to_cache: Arc<[String]>) -> Self {
        Self {
            inner,
            record: Arc::new(TeeRecord::default()),
            headers_to_cache,
        }
    }

    /// Everything read from the body so far, also after disposal.
    pub fn copy(&self) -> Bytes {
        self.record.snapshot()
    }

    pub fn handle(&self) -> TeeHandle {
        TeeHandle {
            record: self.record.clone(),
        }
    }

    /// Capture the configured headers while the inner response still has them.
    fn cache_headers(&self) {
        self.record.cached_headers.get_or_init(|| {
            self.headers_to_cache
                .iter()
                .map(|name| (name.to_ascii_lowercase(), self.inner.header(name)))
                .collect()
        });
    }
}

impl UpstreamResponse for TeeResponse {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn header(&self, name: &str) -> Option<String> {
        if let Some(cached) = self.record.cached(name) {
            return cached.clone();
        }
        if self.is_disposed() {
            return None;
        }
        self.inner.header(name)
    }

    fn header_all(&self, name: &str) -> Vec<String> {
        if let Some(cached) = self.record.cached(name) {
            return cached.iter().cloned().collect();
        }
        if self.is_disposed() {
            return Vec::new();
        }
        self.inner.header_all(name)
    }

    fn take_body(&mut self) -> UpstreamResult<BodyStream> {
        self.cache_headers();
        let body = self.inner.take_body()?;
        let record = self.record.clone();
        let teed = body.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                record.append(bytes);
            }
            chunk
        });
        Ok(teed.boxed())
    }

    fn dispose(&mut self) {
        self.record.disposed.store(true, Ordering::Release);
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.record.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TeeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeResponse")
            .field("status", &self.inner.status())
            .field("buffered", &self.copy().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Decorator over an `HttpTransport` that tees every response.
pub struct TeeingHttpClient<T> {
    inner: T,
    headers_to_cache: Arc<[String]>,
    observer: Option<RequestObserver>,
}

impl<T: HttpTransport> TeeingHttpClient<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            headers_to_cache: Arc::from(Vec::new()),
            observer: None,
        }
    }

    /// Headers to keep readable after the response is disposed.
    pub fn with_cached_headers(mut self, names: &[String]) -> Self {
        self.headers_to_cache = Arc::from(names.to_vec());
        self
    }

    /// Observe every request/response pair, not just the latest.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Url, &TeeHandle) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub async fn tee_get(&self, url: &Url, headers: &HeaderMap) -> UpstreamResult<TeeResponse> {
        let response = self.inner.get(url, headers).await?;
        Ok(self.tee(url, response))
    }

    pub async fn tee_post(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        content_type: &str,
    ) -> UpstreamResult<TeeResponse> {
        let response = self.inner.post(url, headers, body, content_type).await?;
        Ok(self.tee(url, response))
    }

    /// Send a prepared request and tee its response.
    pub async fn tee_execute(&self, request: &ProxyRequest) -> UpstreamResult<TeeResponse> {
        let response = self.inner.execute(request).await?;
        Ok(self.tee(request.uri(), response))
    }

    /// Tee a response that was received without going through this client.
    pub fn tee(&self, url: &Url, response: Box<dyn UpstreamResponse>) -> TeeResponse {
        let teed = TeeResponse::new(response, self.headers_to_cache.clone());
        if let Some(observer) = &self.observer {
            observer(url, &teed.handle());
        }
        teed
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for TeeingHttpClient<T> {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        Ok(Box::new(self.tee_get(url, headers).await?))
    }

    async fn post(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        content_type: &str,
    ) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        Ok(Box::new(self.tee_post(url, headers, body, content_type).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::testing::StaticTransport;
    use crate::upstream::transport::read_to_end;
    use futures_util::TryStreamExt;

    fn url() -> Url {
        Url::parse("http://example.com/wfs?REQUEST=GetCapabilities").unwrap()
    }

    #[tokio::test]
    async fn test_tee_copy_matches_body() {
        let chunks = vec![b"<WFS_".to_vec(), vec![0, 159, 146, 150], b"Capabilities/>".to_vec()];
        let expected: Vec<u8> = chunks.concat();
        let client = TeeingHttpClient::new(StaticTransport::new().respond(200, "text/xml", chunks));

        let mut response = client.tee_get(&url(), &HeaderMap::new()).await.unwrap();
        let body = read_to_end(response.take_body().unwrap(), usize::MAX, &url())
            .await
            .unwrap();

        assert_eq!(body.as_ref(), expected.as_slice());
        assert_eq!(response.copy().as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_partial_read_is_buffered() {
        let chunks = vec![b"first".to_vec(), b"second".to_vec()];
        let client = TeeingHttpClient::new(StaticTransport::new().respond(200, "text/plain", chunks));

        let mut response = client.tee_get(&url(), &HeaderMap::new()).await.unwrap();
        let mut body = response.take_body().unwrap();
        let first = body.try_next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"first");
        assert_eq!(response.copy().as_ref(), b"first");

        drop(body);
        response.dispose();
        assert_eq!(response.copy().as_ref(), b"first");
    }

    #[tokio::test]
    async fn test_cached_header_survives_disposal() {
        let client = TeeingHttpClient::new(
            StaticTransport::new()
                .respond(200, "text/xml; charset=UTF-8", vec![b"<x/>".to_vec()]),
        )
        .with_cached_headers(&["Content-Type".to_string()]);

        let mut response = client.tee_get(&url(), &HeaderMap::new()).await.unwrap();
        let before = response.header("content-type");
        let _ = read_to_end(response.take_body().unwrap(), usize::MAX, &url()).await;
        response.dispose();

        assert_eq!(before.as_deref(), Some("text/xml; charset=UTF-8"));
        assert_eq!(response.header("Content-Type"), before);
        assert_eq!(response.charset().as_deref(), Some("UTF-8"));
        assert!(response.is_disposed());
    }

    #[tokio::test]
    async fn test_uncached_header_absent_after_disposal() {
        let client = TeeingHttpClient::new(
            StaticTransport::new()
                .respond(200, "text/xml", vec![b"<x/>".to_vec()])
                .with_header("x-powered-by", "geoserver"),
        )
        .with_cached_headers(&["Content-Type".to_string()]);

        let mut response = client.tee_get(&url(), &HeaderMap::new()).await.unwrap();
        assert_eq!(response.header("x-powered-by").as_deref(), Some("geoserver"));
        let _ = response.take_body().unwrap();
        response.dispose();

        assert!(response.header("x-powered-by").is_none());
    }

    #[tokio::test]
    async fn test_headers_cached_before_first_read() {
        let client = TeeingHttpClient::new(
            StaticTransport::new()
                .respond(200, "text/xml", vec![b"<x/>".to_vec()])
                .invalidate_headers_on_read(),
        )
        .with_cached_headers(&["Content-Type".to_string()]);

        let mut response = client.tee_get(&url(), &HeaderMap::new()).await.unwrap();
        let _ = read_to_end(response.take_body().unwrap(), usize::MAX, &url()).await;

        assert_eq!(response.content_type().as_deref(), Some("text/xml"));
    }

    #[tokio::test]
    async fn test_observer_sees_every_request() {
        let seen: Arc<Mutex<Vec<(String, TeeHandle)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = TeeingHttpClient::new(
            StaticTransport::new()
                .respond(200, "text/plain", vec![b"one".to_vec()])
                .respond(200, "text/plain", vec![b"two".to_vec()]),
        )
        .with_observer(move |url, handle| {
            sink.lock().unwrap().push((url.to_string(), handle.clone()));
        });

        for path in ["a", "b"] {
            let url = Url::parse(&format!("http://example.com/{}", path)).unwrap();
            let mut response = client.tee_get(&url, &HeaderMap::new()).await.unwrap();
            let _ = read_to_end(response.take_body().unwrap(), usize::MAX, &url).await;
            response.dispose();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "http://example.com/a");
        assert_eq!(seen[0].1.copy().as_ref(), b"one");
        assert_eq!(seen[1].1.copy().as_ref(), b"two");
        assert!(seen[1].1.is_disposed());
    }

    #[tokio::test]
    async fn test_trait_object_delegation() {
        let client = TeeingHttpClient::new(StaticTransport::new().respond(201, "text/plain", vec![b"posted".to_vec()]));
        let transport: &dyn HttpTransport = &client;

        let mut response = transport
            .post(&url(), &HeaderMap::new(), Bytes::from_static(b"a=1"), "application/x-www-form-urlencoded")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_to_end(response.take_body().unwrap(), 1024, &url()).await.unwrap();
        assert_eq!(body.as_ref(), b"posted");
        assert_eq!(client.inner().requests()[0].body.as_deref(), Some(&b"a=1"[..]));
    }
}
