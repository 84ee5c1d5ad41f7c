//! API error responses.
//!
//! Every failure leaves the server as JSON `{"error": "..."}`. Messages name
//! the upstream URL with userinfo stripped and never carry credentials.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::geometry::{CrsError, GeometryError};
use crate::ogc::CapabilitiesError;
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Service '{0}' is not available through the proxy")]
    ProxyDisabled(String),

    #[error("Service '{service}' is a {actual} service, not {requested}")]
    ProtocolMismatch {
        service: String,
        requested: String,
        actual: &'static str,
    },

    #[error("Service '{service}' has an invalid URL: {message}")]
    InvalidServiceUrl { service: String, message: String },

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Capabilities(#[from] CapabilitiesError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownService(_) => StatusCode::NOT_FOUND,
            ApiError::ProxyDisabled(_) => StatusCode::FORBIDDEN,
            ApiError::ProtocolMismatch { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(e) | ApiError::Capabilities(CapabilitiesError::Network(e)) => upstream_status(e),
            ApiError::Capabilities(_) => StatusCode::BAD_GATEWAY,
            ApiError::Crs(_) | ApiError::Geometry(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidServiceUrl { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn upstream_status(error: &UpstreamError) -> StatusCode {
    match error {
        UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        UpstreamError::InvalidRequest(_) | UpstreamError::Tls(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
