//! Redirect policy for upstream requests.
//!
//! Redirects are followed up to `MAX_REDIRECTS` hops. HTTPS to HTTP
//! downgrades stop the chain and hand the 3xx back. Credentials only travel
//! to the origin they were configured for.

use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use url::Url;

/// Hops followed before the last 3xx is returned as is.
pub const MAX_REDIRECTS: usize = 5;

/// Stripped once a redirect leaves the original origin.
const SENSITIVE_HEADERS: &[HeaderName] = &[header::AUTHORIZATION, header::COOKIE, header::PROXY_AUTHORIZATION];

/// What to do with a 3xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectStep {
    /// Not a redirect, or one we do not follow.
    Stop,
    /// Follow to `target`; `keep_body` is false when the method becomes GET.
    Follow { target: Url, keep_body: bool },
}

/// Decide whether to follow a response from `current`.
pub fn next_step(status: StatusCode, location: Option<&str>, current: &Url, hops: usize) -> RedirectStep {
    let keep_body = match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => false,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
        _ => return RedirectStep::Stop,
    };
    let Some(target) = location.and_then(|l| current.join(l).ok()) else {
        return RedirectStep::Stop;
    };

    if hops >= MAX_REDIRECTS {
        tracing::debug!(hops, "Redirect limit reached");
        return RedirectStep::Stop;
    }
    if current.scheme() == "https" && target.scheme() == "http" {
        tracing::warn!(target = %target.origin().ascii_serialization(), "Not following HTTPS to HTTP redirect");
        return RedirectStep::Stop;
    }
    if !matches!(target.scheme(), "http" | "https") {
        return RedirectStep::Stop;
    }

    RedirectStep::Follow { target, keep_body }
}

/// Same scheme, host and effective port.
pub fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Drop credentials before a request leaves its original origin.
pub fn strip_credentials(headers: &mut HeaderMap) {
    for name in SENSITIVE_HEADERS {
        if headers.remove(name).is_some() {
            tracing::debug!(header = %name, "Stripped header on cross-origin redirect");
        }
    }
}
