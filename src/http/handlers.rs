//! Route handlers.
//!
//! - `GET|POST /api/proxy/{service}/{protocol}`: WMS/WFS relay
//! - `GET /api/proxy/{service}/output-formats?typeName=`: WFS output formats
//! - `POST /api/geometry`: reprojection and simplification of one WKT geometry

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Path, Query, State},
    http::Request,
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ProxyConfig, ServiceConfig, ServiceProtocol};
use crate::forwarding::{merge_ogc_params, Credentials, InboundRequest};
use crate::http::proxy::ProxiedResponse;
use crate::http::request::RequestIdExt;
use crate::http::response::ApiError;
use crate::http::server::AppState;

/// Relay a client request to the named service.
pub async fn proxy(
    State(state): State<AppState>,
    Path((service_name, protocol)): Path<(String, String)>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<ProxiedResponse, ApiError> {
    let service = proxied_service(&state.config, &service_name)?;
    let requested = ServiceProtocol::from_path(&protocol)
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported protocol '{}'", protocol)))?;
    ensure_protocol(service, requested)?;

    let (parts, body) = request.into_parts();
    tracing::debug!(
        request_id = %parts.headers.request_id(),
        service = %service.name,
        method = %parts.method,
        "Proxying request"
    );

    let inbound = InboundRequest::new(parts.method, parts.headers)
        .with_remote_addr(remote.ip().to_string());

    let mut params = parts.uri.query().unwrap_or_default().to_string();
    if inbound.is_form_post() {
        let form = to_bytes(body, state.config.security.max_body_size)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Unreadable request body: {}", e)))?;
        let form = std::str::from_utf8(&form)
            .map_err(|_| ApiError::BadRequest("Form body is not UTF-8".to_string()))?;
        append_params(&mut params, form.trim());
    }

    let target = merge_ogc_params(&service_url(service)?, &params);
    let credentials = credentials(service);
    let response = state
        .endpoint
        .proxy(&inbound, target, credentials.as_ref(), service.protocol)
        .await?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct OutputFormatsQuery {
    #[serde(rename = "typeName")]
    pub type_name: String,
}

/// Output formats a WFS offers for one feature type, with provenance and
/// version markers.
pub async fn output_formats(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    Query(query): Query<OutputFormatsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let service = state
        .config
        .service(&service_name)
        .ok_or_else(|| ApiError::UnknownService(service_name.clone()))?;
    ensure_protocol(service, ServiceProtocol::Wfs)?;

    let result = state
        .negotiator
        .resolve_output_formats(&service_url(service)?, &query.type_name, credentials(service).as_ref())
        .await?;
    Ok(Json(result.into_marked_list()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryRequest {
    pub geometry: String,
    #[serde(default)]
    pub source_crs: Option<String>,
    #[serde(default)]
    pub target_crs: Option<String>,
    #[serde(default)]
    pub simplify: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeometryResponse {
    pub geometry: String,
}

/// Reproject (when both systems are given and differ) and simplify or
/// linearize a WKT geometry.
pub async fn geometry(
    State(state): State<AppState>,
    Json(request): Json<GeometryRequest>,
) -> Result<Json<GeometryResponse>, ApiError> {
    let transform = match (&request.source_crs, &request.target_crs) {
        (Some(source), Some(target)) => state.resolver.to_target(source, target)?,
        _ => None,
    };

    let processor = state.processor;
    let wkt = tokio::task::spawn_blocking(move || {
        processor.process_wkt(&request.geometry, request.simplify, transform.as_ref())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(GeometryResponse { geometry: wkt }))
}

/// A configured service that clients may reach through the proxy.
fn proxied_service<'a>(config: &'a ProxyConfig, name: &str) -> Result<&'a ServiceConfig, ApiError> {
    let service = config
        .service(name)
        .ok_or_else(|| ApiError::UnknownService(name.to_string()))?;
    if !service.use_proxy {
        return Err(ApiError::ProxyDisabled(name.to_string()));
    }
    Ok(service)
}

fn ensure_protocol(service: &ServiceConfig, requested: ServiceProtocol) -> Result<(), ApiError> {
    if service.protocol != requested {
        return Err(ApiError::ProtocolMismatch {
            service: service.name.clone(),
            requested: requested.as_str().to_string(),
            actual: service.protocol.as_str(),
        });
    }
    Ok(())
}

fn service_url(service: &ServiceConfig) -> Result<Url, ApiError> {
    Url::parse(&service.url).map_err(|e| ApiError::InvalidServiceUrl {
        service: service.name.clone(),
        message: e.to_string(),
    })
}

fn credentials(service: &ServiceConfig) -> Option<Credentials> {
    service.authentication.as_ref().map(|auth| Credentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
    })
}

fn append_params(params: &mut String, extra: &str) {
    if extra.is_empty() {
        return;
    }
    if !params.is_empty() {
        params.push('&');
    }
    params.push_str(extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthenticationConfig;

    fn service(protocol: ServiceProtocol, use_proxy: bool) -> ServiceConfig {
        ServiceConfig {
            name: "roads".to_string(),
            url: "https://example.com/geoserver/wfs".to_string(),
            protocol,
            use_proxy,
            authentication: None,
        }
    }

    #[test]
    fn test_proxied_service_lookup() {
        let config = ProxyConfig {
            services: vec![service(ServiceProtocol::Wfs, true), {
                let mut hidden = service(ServiceProtocol::Wms, false);
                hidden.name = "hidden".to_string();
                hidden
            }],
            ..ProxyConfig::default()
        };

        assert!(proxied_service(&config, "roads").is_ok());
        assert!(matches!(proxied_service(&config, "missing"), Err(ApiError::UnknownService(_))));
        assert!(matches!(proxied_service(&config, "hidden"), Err(ApiError::ProxyDisabled(_))));
    }

    #[test]
    fn test_protocol_mismatch() {
        let wfs = service(ServiceProtocol::Wfs, true);
        assert!(ensure_protocol(&wfs, ServiceProtocol::Wfs).is_ok());
        let err = ensure_protocol(&wfs, ServiceProtocol::Wms).unwrap_err();
        assert_eq!(err.to_string(), "Service 'roads' is a wfs service, not wms");
    }

    #[test]
    fn test_append_params() {
        let mut params = String::new();
        append_params(&mut params, "SERVICE=WFS");
        append_params(&mut params, "");
        append_params(&mut params, "CQL_FILTER=a%3D1");
        assert_eq!(params, "SERVICE=WFS&CQL_FILTER=a%3D1");
    }

    #[test]
    fn test_credentials_from_config() {
        let mut secured = service(ServiceProtocol::Wms, true);
        assert!(credentials(&secured).is_none());
        secured.authentication = Some(AuthenticationConfig {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        });
        assert_eq!(credentials(&secured), Some(Credentials::new("user", "pass")));
    }

    #[test]
    fn test_geometry_request_defaults() {
        let request: GeometryRequest = serde_json::from_str(r#"{"geometry":"POINT(1 2)"}"#).unwrap();
        assert!(!request.simplify);
        assert!(request.source_crs.is_none());

        let request: GeometryRequest = serde_json::from_str(
            r#"{"geometry":"POINT(1 2)","sourceCrs":"EPSG:28992","targetCrs":"EPSG:4326","simplify":true}"#,
        )
        .unwrap();
        assert_eq!(request.source_crs.as_deref(), Some("EPSG:28992"));
        assert!(request.simplify);
    }
}
