//! WFS capabilities negotiation.
//!
//! # Responsibilities
//! - Fetch a GetCapabilities document through the teeing client
//! - Parse it with the namespaces of the version the server actually speaks
//! - Resolve output formats for a feature type, falling back from the
//!   feature type declaration to the global GetFeature parameter
//!
//! # Design Decisions
//! - Documents are fetched per negotiation, never cached
//! - Type names are compared as plain strings while scanning siblings; they
//!   may contain characters that cannot be quoted in a query expression
//! - DTDs are refused outright, so no entity is ever expanded or resolved

use std::sync::Arc;

use roxmltree::{Document, Node, ParsingOptions};
use thiserror::Error;
use url::Url;

use crate::forwarding::{Credentials, ProxyRequest};
use crate::observability::logging::redact_url;
use crate::observability::metrics::record_capabilities_negotiation;
use crate::ogc::exception::service_exception_message;
use crate::ogc::request::ogc_request_url;
use crate::upstream::{read_to_end, HttpTransport, TeeingHttpClient, UpstreamError, UpstreamResponse};

/// Version requested when the caller does not ask for one.
pub const DEFAULT_WFS_VERSION: &str = "1.1.0";

const VERSION_MARKER_PREFIX: &str = "wfsversion:";

#[derive(Debug, Error)]
pub enum CapabilitiesError {
    /// The capabilities request failed in transit.
    #[error(transparent)]
    Network(#[from] UpstreamError),

    /// The service answered with an error status.
    #[error("Capabilities request to {url} returned HTTP {status}{}", detail_suffix(.detail))]
    Status {
        url: String,
        status: u16,
        detail: Option<String>,
    },

    /// The response is not a usable capabilities document.
    #[error("Cannot parse capabilities from {url}: {message}")]
    Parse { url: String, message: String },
}

pub type CapabilitiesResult<T> = Result<T, CapabilitiesError>;

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {}", d)).unwrap_or_default()
}

/// Namespace URIs for one WFS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespaces {
    pub ows: &'static str,
    pub wfs: &'static str,
}

impl Namespaces {
    pub fn for_version(version: &str) -> Self {
        if version == "2.0.0" {
            Self {
                ows: "http://www.opengis.net/ows/1.1",
                wfs: "http://www.opengis.net/wfs/2.0",
            }
        } else {
            Self {
                ows: "http://www.opengis.net/ows",
                wfs: "http://www.opengis.net/wfs",
            }
        }
    }
}

/// Which fallback tier produced an output format list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSource {
    FromFeatureType,
    Global,
}

impl FormatSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatSource::FromFeatureType => "fromFeatureType",
            FormatSource::Global => "global",
        }
    }
}

/// Output formats for one feature type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormatResult {
    pub formats: Vec<String>,
    pub source: FormatSource,
    pub version: String,
}

impl OutputFormatResult {
    /// The list shape clients consume: formats, then the source tag, then
    /// `wfsversion:<version>`.
    pub fn into_marked_list(self) -> Vec<String> {
        let mut list = self.formats;
        list.push(self.source.as_str().to_string());
        list.push(format!("{}{}", VERSION_MARKER_PREFIX, self.version));
        list
    }
}

/// A parsed capabilities document.
pub struct CapabilitiesDocument<'input> {
    doc: Document<'input>,
    version: String,
    namespaces: Namespaces,
}

impl<'input> CapabilitiesDocument<'input> {
    /// Parse `text`. A missing `version` attribute falls back to `requested_version`.
    pub fn parse(text: &'input str, requested_version: &str) -> Result<Self, String> {
        let options = ParsingOptions {
            allow_dtd: false,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options).map_err(|e| e.to_string())?;
        let root = doc.root_element();

        if root.tag_name().name().ends_with("ExceptionReport") {
            let message = service_exception_message(text.as_bytes())
                .unwrap_or_else(|| "no message available".to_string());
            return Err(format!("service exception: {}", message));
        }
        if !root.tag_name().name().ends_with("Capabilities") {
            return Err(format!("unexpected root element '{}'", root.tag_name().name()));
        }

        let version = root
            .attribute("version")
            .unwrap_or(requested_version)
            .to_string();
        let namespaces = Namespaces::for_version(&version);
        Ok(Self {
            doc,
            version,
            namespaces,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn namespaces(&self) -> Namespaces {
        self.namespaces
    }

    /// Formats for `type_name`: the feature type's own `OutputFormats` block if
    /// present (possibly empty), otherwise the GetFeature `outputFormat`
    /// parameter (possibly empty).
    pub fn output_formats(&self, type_name: &str) -> OutputFormatResult {
        let (formats, source) = match self.feature_type_formats(type_name) {
            Some(formats) => (formats, FormatSource::FromFeatureType),
            None => (self.global_formats(), FormatSource::Global),
        };
        OutputFormatResult {
            formats,
            source,
            version: self.version.clone(),
        }
    }

    /// `Some` whenever the matching feature type has an `OutputFormats` block,
    /// even an empty one. Names are compared exactly.
    fn feature_type_formats(&self, type_name: &str) -> Option<Vec<String>> {
        let wfs = self.namespaces.wfs;
        let feature_type = self
            .doc
            .descendants()
            .filter(|n| is_element(n, wfs, "FeatureType"))
            .find(|ft| {
                ft.children()
                    .find(|c| is_element(c, wfs, "Name"))
                    .map(|name| name.text().unwrap_or("") == type_name)
                    .unwrap_or(false)
            })?;

        let block = feature_type
            .children()
            .find(|c| is_element(c, wfs, "OutputFormats"))?;

        Some(
            block
                .children()
                .filter(|c| is_element(c, wfs, "Format"))
                .filter_map(|format| element_text(&format))
                .collect(),
        )
    }

    fn global_formats(&self) -> Vec<String> {
        let ows = self.namespaces.ows;
        self.doc
            .descendants()
            .filter(|n| is_element(n, ows, "OperationsMetadata"))
            .flat_map(|m| m.children().filter(|c| is_element(c, ows, "Operation")))
            .filter(|op| op.attribute("name") == Some("GetFeature"))
            .flat_map(|op| op.children().filter(|c| is_element(c, ows, "Parameter")))
            .filter(|param| param.attribute("name") == Some("outputFormat"))
            .flat_map(|param| param.descendants().filter(|v| is_element(v, ows, "Value")))
            .filter_map(|value| element_text(&value))
            .collect()
    }
}

fn is_element(node: &Node, namespace: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace() == Some(namespace)
}

fn element_text(node: &Node) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Decode a capabilities body to text. Only UTF-8 and Latin-1 are accepted.
fn decode_body(body: &[u8], charset: Option<&str>) -> Result<String, String> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let latin1 = charset
        .map(|c| matches!(c.to_ascii_lowercase().as_str(), "iso-8859-1" | "latin1" | "iso8859-1"))
        .unwrap_or(false);
    if latin1 {
        return Ok(body.iter().map(|&b| b as char).collect());
    }
    String::from_utf8(body.to_vec()).map_err(|e| format!("body is not UTF-8: {}", e))
}

/// Resolves output formats by fetching capabilities from the service.
pub struct CapabilitiesNegotiator<T> {
    client: Arc<TeeingHttpClient<T>>,
    max_body: usize,
    version: String,
}

impl<T: HttpTransport> CapabilitiesNegotiator<T> {
    pub fn new(client: Arc<TeeingHttpClient<T>>, max_body: usize) -> Self {
        Self {
            client,
            max_body,
            version: DEFAULT_WFS_VERSION.to_string(),
        }
    }

    /// Request a different WFS version in GetCapabilities.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub async fn resolve_output_formats(
        &self,
        service_url: &Url,
        type_name: &str,
        credentials: Option<&Credentials>,
    ) -> CapabilitiesResult<OutputFormatResult> {
        let url = ogc_request_url(service_url, "WFS", &self.version, "GetCapabilities", &[]);
        let redacted = redact_url(&url);
        let text = self.fetch(url, credentials).await?;

        let doc = CapabilitiesDocument::parse(&text, &self.version).map_err(|message| {
            CapabilitiesError::Parse {
                url: redacted.clone(),
                message,
            }
        })?;
        let result = doc.output_formats(type_name);

        tracing::debug!(
            upstream = %redacted,
            type_name = %type_name,
            source = result.source.as_str(),
            version = %result.version,
            formats = result.formats.len(),
            "Resolved output formats"
        );
        record_capabilities_negotiation(result.source.as_str());
        Ok(result)
    }

    /// Fetch the document, read it to the end and decode the teed copy.
    async fn fetch(&self, url: Url, credentials: Option<&Credentials>) -> CapabilitiesResult<String> {
        let request = ProxyRequest::get(url, credentials);
        let redacted = redact_url(request.uri());
        tracing::info!(upstream = %redacted, "Fetching WFS capabilities");

        let mut response = self.client.tee_execute(&request).await?;
        let read = read_to_end(response.take_body()?, self.max_body, request.uri()).await;
        response.dispose();
        read?;

        let copy = response.copy();
        let status = response.status();
        if !status.is_success() {
            return Err(CapabilitiesError::Status {
                url: redacted,
                status: status.as_u16(),
                detail: service_exception_message(&copy),
            });
        }

        let charset = response.charset();
        decode_body(&copy, charset.as_deref()).map_err(|message| CapabilitiesError::Parse {
            url: redacted,
            message,
        })
    }
}
