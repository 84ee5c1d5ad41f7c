//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → handlers.rs (service lookup, parameter merge)
//!     → proxy.rs (one upstream exchange, allow-listed headers, streamed body)
//!     → response.rs (errors as JSON with a mapped status)
//!     → Send to client
//! ```

pub mod handlers;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{ProxiedResponse, ProxyEndpoint};
pub use request::{MakeRequestUuid, RequestIdExt, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{AppState, HttpServer, StartupError};
