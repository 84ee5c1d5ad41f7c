//! Configuration validation.
//!
//! Semantic checks run after serde has accepted the file. All problems are
//! reported, not just the first one.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::geometry::crs::parse_epsg_code;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.read_secs == 0 {
        errors.push(ValidationError::new("timeouts.read_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.geometry.max_bytes() == 0 {
        errors.push(ValidationError::new(
            "geometry.safety_margin_bytes",
            "safety margin leaves no byte budget",
        ));
    }
    if config.geometry.max_vertices == 0 {
        errors.push(ValidationError::new("geometry.max_vertices", "must be greater than 0"));
    }
    if let Some(scale) = config.geometry.precision_scale {
        if !(scale.is_finite() && scale > 0.0) {
            errors.push(ValidationError::new(
                "geometry.precision_scale",
                "must be a positive number",
            ));
        }
    }

    for code in config.crs.definitions.keys() {
        if parse_epsg_code(code).is_none() {
            errors.push(ValidationError::new(
                format!("crs.definitions.{}", code),
                "key must be an EPSG code",
            ));
        }
    }

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{}].name", i),
                format!("duplicate service name '{}'", service.name),
            ));
        }
        match url::Url::parse(&service.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("services[{}].url", i),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("services[{}].url", i),
                e.to_string(),
            )),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
