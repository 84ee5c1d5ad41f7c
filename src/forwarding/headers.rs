//! Header manipulation for proxied requests and responses.
//!
//! # Responsibilities
//! - Add X-Forwarded-For and Forwarded for the client address
//! - Copy allow-listed headers in both directions
//! - Inject HTTP Basic credentials for secured services
//!
//! # Design Decisions
//! - Never blanket-copy headers: hop-by-hop, cookies and upstream
//!   infrastructure headers stay on their side of the proxy
//! - Forwarded-for is best effort; an unparsable address adds nothing

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::forwarding::request::Credentials;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const FORWARDED: HeaderName = HeaderName::from_static("forwarded");

/// Format a client address for `X-Forwarded-For` / `Forwarded: for=`.
///
/// IPv6 zone suffixes (`%eth0`) are stripped and the literal is bracketed and
/// quoted, as `Forwarded` requires. Returns `None` for anything that is not an
/// IP address.
pub fn forwarded_for_value(remote: &str) -> Option<String> {
    let trimmed = remote.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    let address = match unbracketed.split_once('%') {
        Some((address, _zone)) => address,
        None => unbracketed,
    };

    match address.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(v4.to_string()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(v4.to_string()),
            None => Some(format!("\"[{}]\"", v6)),
        },
    }
}

/// Add `X-Forwarded-For` and `Forwarded` headers for the client address.
pub fn add_forwarded_for_headers(headers: &mut HeaderMap, remote: Option<&str>) {
    let Some(ip) = remote.and_then(forwarded_for_value) else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&ip) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("for={}", ip)) {
        headers.insert(FORWARDED, value);
    }
}

/// Parse configured header names, skipping (and logging) invalid ones.
pub fn parse_allow_list(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header) => Some(header),
            Err(_) => {
                tracing::warn!(header = %name, "Ignoring invalid header name in allow-list");
                None
            }
        })
        .collect()
}

/// Copy every value of each allow-listed header present on the inbound request.
pub fn passthrough_request_headers(
    outbound: &mut HeaderMap,
    inbound: &HeaderMap,
    allow_list: &[HeaderName],
) {
    for name in allow_list {
        for value in inbound.get_all(name) {
            outbound.append(name.clone(), value.clone());
        }
    }
}

/// Build the client response headers from an upstream lookup returning every value of a header.
pub fn passthrough_response_headers<F>(lookup: F, allow_list: &[HeaderName]) -> HeaderMap
where
    F: Fn(&str) -> Vec<String>,
{
    let mut headers = HeaderMap::new();
    for name in allow_list {
        for value in lookup(name.as_str()) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

/// `Authorization: Basic ...` value, only when both username and password are set.
pub fn basic_auth_value(credentials: &Credentials) -> Option<HeaderValue> {
    let (Some(username), Some(password)) = (&credentials.username, &credentials.password) else {
        return None;
    };
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded)).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Inject HTTP Basic authentication when credentials are complete.
pub fn set_basic_auth_header(headers: &mut HeaderMap, credentials: Option<&Credentials>) {
    if let Some(value) = credentials.and_then(basic_auth_value) {
        headers.insert(header::AUTHORIZATION, value);
    }
}
