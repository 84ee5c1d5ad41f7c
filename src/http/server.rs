//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Build the shared upstream client, negotiator and geometry pipeline
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::forwarding::HeaderForwarder;
use crate::geometry::{CrsError, EpsgRegistry, GeometryProcessor, ReferenceSystemResolver};
use crate::http::handlers;
use crate::http::proxy::ProxyEndpoint;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::ogc::CapabilitiesNegotiator;
use crate::upstream::{HyperTransport, TeeingHttpClient, UpstreamError};

/// Failures while assembling the server from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Reference system setup failed: {0}")]
    Crs(#[from] CrsError),

    #[error("Upstream client setup failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub endpoint: Arc<ProxyEndpoint<HyperTransport>>,
    pub negotiator: Arc<CapabilitiesNegotiator<HyperTransport>>,
    pub resolver: Arc<ReferenceSystemResolver>,
    pub processor: GeometryProcessor,
}

impl AppState {
    /// Build every shared component from configuration.
    pub fn from_config(config: ProxyConfig) -> Result<Self, StartupError> {
        let client = Arc::new(
            TeeingHttpClient::new(HyperTransport::new(&config.timeouts)?)
                .with_cached_headers(&config.tee.cache_headers),
        );
        let endpoint = ProxyEndpoint::new(
            client.clone(),
            HeaderForwarder::new(&config.forwarding.request_headers),
            &config.forwarding.response_headers,
            config.security.max_upstream_body_size,
        );
        let negotiator = CapabilitiesNegotiator::new(client, config.security.max_upstream_body_size);
        let registry = EpsgRegistry::with_definitions(&config.crs.definitions)?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            negotiator: Arc::new(negotiator),
            resolver: Arc::new(ReferenceSystemResolver::new(registry)),
            processor: GeometryProcessor::from_config(&config.geometry),
            config: Arc::new(config),
        })
    }
}

/// HTTP server for the geo service proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let state = AppState::from_config(config)?;
        let config = state.config.clone();
        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/api/proxy/{service}/output-formats", get(handlers::output_formats))
            .route(
                "/api/proxy/{service}/{protocol}",
                get(handlers::proxy).post(handlers::proxy),
            )
            .route("/api/geometry", post(handlers::geometry))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.config.services.len(),
            "HTTP server starting"
        );

        let mut signal = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, ServiceProtocol};
    use crate::http::request::X_REQUEST_ID;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let config = ProxyConfig {
            services: vec![ServiceConfig {
                name: "basemap".to_string(),
                url: "http://127.0.0.1:1/wms".to_string(),
                protocol: ServiceProtocol::Wms,
                use_proxy: true,
                authentication: None,
            }],
            ..ProxyConfig::default()
        };
        HttpServer::new(config).unwrap().router
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_geometry(body: Value) -> Request<Body> {
        Request::post("/api/geometry")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_state_builds_from_default_config() {
        let state = AppState::from_config(ProxyConfig::default()).unwrap();
        assert!(state.config.services.is_empty());
    }

    #[tokio::test]
    async fn test_geometry_endpoint_linearizes() {
        let response = router()
            .oneshot(post_geometry(json!({ "geometry": "LINEARRING (0 0, 1 0, 1 1, 0 0)" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
        assert_eq!(json_body(response).await, json!({ "geometry": "LINESTRING(0 0,1 0,1 1,0 0)" }));
    }

    #[tokio::test]
    async fn test_geometry_endpoint_rejects_unknown_crs() {
        let response = router()
            .oneshot(post_geometry(json!({
                "geometry": "POINT (1 2)",
                "sourceCrs": "EPSG:999999",
                "targetCrs": "EPSG:4326"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("EPSG:999999"));
    }

    #[tokio::test]
    async fn test_geometry_endpoint_rejects_bad_wkt() {
        let response = router()
            .oneshot(post_geometry(json!({ "geometry": "POLYGON ((0 0, 1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_output_formats_requires_wfs() {
        let request = Request::get("/api/proxy/basemap/output-formats?typeName=roads")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::get("/api/proxy/unknown/output-formats?typeName=roads")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_client_request_id_is_echoed() {
        let request = Request::get("/api/proxy/unknown/output-formats?typeName=roads")
            .header(X_REQUEST_ID, "trace-42")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "trace-42");
    }
}
