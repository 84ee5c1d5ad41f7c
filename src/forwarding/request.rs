//! Outbound request construction.
//!
//! # Responsibilities
//! - Capture what we need from the inbound request
//! - Build the immutable `ProxyRequest` sent upstream
//! - Move parameters of form-encoded POSTs into the outbound body
//! - Merge service URL parameters with client parameters
//!
//! # Design Decisions
//! - Query strings are handled raw: percent-encoding is preserved and `+`
//!   is never decoded to a space
//! - The OGC parameters SERVICE, REQUEST and VERSION always come from the
//!   client request, never from the configured service URL

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use url::Url;

use crate::forwarding::headers::{
    add_forwarded_for_headers, parse_allow_list, passthrough_request_headers,
    set_basic_auth_header,
};

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

const OGC_PARAMS: [&str; 3] = ["SERVICE", "REQUEST", "VERSION"];

/// HTTP Basic credentials for an upstream service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The parts of a client request that influence the upstream request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    headers: HeaderMap,
    remote_addr: Option<String>,
}

impl InboundRequest {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            method,
            headers,
            remote_addr: None,
        }
    }

    /// Client address as reported by the transport, e.g. `fe80::1%eth0`.
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// True for a POST with `application/x-www-form-urlencoded` content.
    pub fn is_form_post(&self) -> bool {
        self.method == Method::POST
            && self
                .content_type()
                .map(|ct| ct.to_ascii_lowercase().contains(FORM_URLENCODED))
                .unwrap_or(false)
    }
}

/// A fully prepared upstream request. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    uri: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    credentials: Option<Credentials>,
}

impl ProxyRequest {
    /// A plain GET with no extra headers.
    pub fn get(uri: Url, credentials: Option<&Credentials>) -> Self {
        let mut headers = HeaderMap::new();
        set_basic_auth_header(&mut headers, credentials);
        Self {
            uri,
            method: Method::GET,
            headers,
            body: None,
            credentials: credentials.cloned(),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Builds upstream requests from inbound ones.
#[derive(Debug, Clone)]
pub struct HeaderForwarder {
    allow_list: Vec<HeaderName>,
}

impl HeaderForwarder {
    /// Create a forwarder copying only the given request headers.
    pub fn new(allow_list: &[String]) -> Self {
        Self {
            allow_list: parse_allow_list(allow_list),
        }
    }

    /// Produce the upstream equivalent of `inbound`, targeted at `target`.
    pub fn forward(
        &self,
        inbound: &InboundRequest,
        target: Url,
        credentials: Option<&Credentials>,
    ) -> ProxyRequest {
        let (method, uri, body) = configure_for_uri(target, inbound);

        let mut headers = HeaderMap::new();
        add_forwarded_for_headers(&mut headers, inbound.remote_addr());
        passthrough_request_headers(&mut headers, inbound.headers(), &self.allow_list);
        if body.is_some() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
        }
        set_basic_auth_header(&mut headers, credentials);

        ProxyRequest {
            uri,
            method,
            headers,
            body,
            credentials: credentials.cloned(),
        }
    }
}

/// Decide method, URI and body for the upstream request.
///
/// A form-encoded POST is relayed as a POST with every query parameter in the
/// body, so long parameters like CQL filters do not hit URI length limits.
pub fn configure_for_uri(target: Url, inbound: &InboundRequest) -> (Method, Url, Option<Bytes>) {
    if !inbound.is_form_post() {
        return (Method::GET, target, None);
    }

    match target.query().filter(|q| !q.is_empty()) {
        Some(query) => {
            let body = Bytes::from(query.to_string());
            let mut without_query = target.clone();
            without_query.set_query(None);
            (Method::POST, without_query, Some(body))
        }
        None => (Method::GET, target, None),
    }
}

/// Split a raw query string into raw (still percent-encoded) key/value pairs.
pub fn raw_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Combine the client's parameters with the configured service URL.
///
/// Client parameters come first. Service URL parameters are appended when the
/// client did not send the same key and they are not SERVICE, REQUEST or
/// VERSION (compared case-insensitively).
pub fn merge_ogc_params(service_url: &Url, request_query: &str) -> Url {
    let request_params = raw_query_pairs(request_query);
    let mut params = request_params.clone();

    if let Some(service_query) = service_url.query() {
        for (key, value) in raw_query_pairs(service_query) {
            let is_ogc = OGC_PARAMS.contains(&key.to_ascii_uppercase().as_str());
            let overridden = request_params.iter().any(|(k, _)| *k == key);
            if !is_ogc && !overridden {
                params.push((key, value));
            }
        }
    }

    let mut merged = service_url.clone();
    if params.is_empty() {
        merged.set_query(None);
    } else {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        merged.set_query(Some(&query));
    }
    merged
}
