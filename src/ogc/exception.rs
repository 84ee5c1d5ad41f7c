//! WMS service exception reports.
//!
//! Extraction is best effort: a body that is not a recognisable exception
//! report yields `None` instead of an error.

use roxmltree::{Document, Node, ParsingOptions};

/// Content types under which services send exception reports.
const EXCEPTION_CONTENT_TYPES: [&str; 3] = [
    "application/vnd.ogc.se_xml",
    "application/vnd.ogc.se+xml",
    "text/xml",
];

/// True when a response with this content type may carry an exception report.
pub fn is_exception_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    EXCEPTION_CONTENT_TYPES.contains(&essence.as_str())
}

/// Parse a WMS exception document of any version into one line of text:
/// `code: C: locator: L: text`, with absent parts left out.
pub fn service_exception_message(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let options = ParsingOptions {
        allow_dtd: false,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(text, options).ok()?;
    let root = doc.root_element();

    let (code, locator, text) = if root.tag_name().name() == "ServiceExceptionReport" {
        // WMS 1.3.0
        let exception = root
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "ServiceException")?;
        (
            exception.attribute("code"),
            exception.attribute("locator"),
            text_content(exception),
        )
    } else if root.tag_name().name() == "ExceptionReport" && root.tag_name().namespace().is_some() {
        // WMS 1.0.0 and 1.1.x, OWS
        let exception = root.children().find(Node::is_element)?;
        let first = exception.children().find(Node::is_element)?;
        (
            exception.attribute("exceptionCode"),
            exception.attribute("locator"),
            text_content(first),
        )
    } else {
        return None;
    };

    let mut message = text;
    if let Some(locator) = locator.filter(|l| !l.trim().is_empty()) {
        message = format!("locator: {}: {}", locator, message);
    }
    if let Some(code) = code.filter(|c| !c.trim().is_empty()) {
        message = format!("code: {}: {}", code, message);
    }
    Some(message)
}

fn text_content(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wms_130_exception() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ServiceExceptionReport version="1.3.0" xmlns="http://www.opengis.net/ogc">
  <ServiceException code="LayerNotDefined" locator="layers">
    Could not find layer roads
  </ServiceException>
</ServiceExceptionReport>"#;
        assert_eq!(
            service_exception_message(body).as_deref(),
            Some("code: LayerNotDefined: locator: layers: Could not find layer roads")
        );
    }

    #[test]
    fn test_ows_exception_report() {
        let body = br#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows" version="1.1.0">
  <ows:Exception exceptionCode="InvalidParameterValue">
    <ows:ExceptionText>Unknown request</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;
        assert_eq!(
            service_exception_message(body).as_deref(),
            Some("code: InvalidParameterValue: Unknown request")
        );
    }

    #[test]
    fn test_without_code_or_locator() {
        let body = b"<ServiceExceptionReport><ServiceException>boom</ServiceException></ServiceExceptionReport>";
        assert_eq!(service_exception_message(body).as_deref(), Some("boom"));
    }

    #[test]
    fn test_unrecognised_bodies() {
        assert!(service_exception_message(b"not xml at all").is_none());
        assert!(service_exception_message(b"<WMS_Capabilities version=\"1.3.0\"/>").is_none());
        assert!(service_exception_message(b"<ServiceExceptionReport/>").is_none());
        assert!(service_exception_message(&[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn test_dtd_is_rejected() {
        let body = br#"<?xml version="1.0"?>
<!DOCTYPE ServiceExceptionReport [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<ServiceExceptionReport><ServiceException>&xxe;</ServiceException></ServiceExceptionReport>"#;
        assert!(service_exception_message(body).is_none());
    }

    #[test]
    fn test_exception_content_types() {
        assert!(is_exception_content_type("application/vnd.ogc.se_xml"));
        assert!(is_exception_content_type("text/xml; charset=UTF-8"));
        assert!(!is_exception_content_type("image/png"));
    }
}
