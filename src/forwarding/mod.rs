//! Request forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! client request (method, headers, remote address)
//!     → request.rs (POST rewrite, parameter merge, ProxyRequest)
//!     → headers.rs (forwarded-for, allow-list copy, basic auth)
//!     → ProxyRequest handed to the upstream transport
//! ```
//!
//! # Design Decisions
//! - Nothing here performs I/O; errors only arise in the transport
//! - Allow-lists are configuration, never hardcoded in handlers

pub mod headers;
pub mod request;

pub use headers::{
    add_forwarded_for_headers, basic_auth_value, forwarded_for_value, parse_allow_list,
    passthrough_request_headers, passthrough_response_headers,
};
pub use request::{
    configure_for_uri, merge_ogc_params, Credentials, HeaderForwarder, InboundRequest,
    ProxyRequest, FORM_URLENCODED,
};
