//! OGC key-value-pair request construction.

use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::forwarding::request::raw_query_pairs;

/// Build an OGC request URL on top of a service base URL.
///
/// SERVICE, VERSION, REQUEST and every key in `extra` replace parameters of
/// the same name (case-insensitive) already present on `base`. Other base
/// parameters are kept raw. New values are form-encoded, so `+` in MIME types
/// becomes `%2B`.
pub fn ogc_request_url(
    base: &Url,
    service: &str,
    version: &str,
    request: &str,
    extra: &[(&str, &str)],
) -> Url {
    let mut params: Vec<(&str, &str)> = vec![("SERVICE", service), ("VERSION", version), ("REQUEST", request)];
    params.extend_from_slice(extra);

    let kept = base
        .query()
        .map(raw_query_pairs)
        .unwrap_or_default()
        .into_iter()
        .filter(|(key, _)| !params.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)))
        .map(|(key, value)| format!("{}={}", key, value));

    let added = params
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)));

    let query = kept.chain(added).collect::<Vec<_>>().join("&");
    let mut url = base.clone();
    url.set_query(Some(&query));
    url
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_ogc_params() {
        let base = Url::parse("https://example.com/geoserver/wfs?service=WMS&request=GetMap&map=%2Fdata%2Fa.map").unwrap();
        let url = ogc_request_url(&base, "WFS", "1.1.0", "GetCapabilities", &[]);
        assert_eq!(
            url.query(),
            Some("map=%2Fdata%2Fa.map&SERVICE=WFS&VERSION=1.1.0&REQUEST=GetCapabilities")
        );
    }

    #[test]
    fn test_extra_values_are_form_encoded() {
        let base = Url::parse("https://example.com/wfs").unwrap();
        let url = ogc_request_url(
            &base,
            "WFS",
            "2.0.0",
            "GetFeature",
            &[("typeNames", "app:roads"), ("outputFormat", "application/json; subtype=geojson+x")],
        );
        assert_eq!(
            url.query(),
            Some("SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&typeNames=app%3Aroads&outputFormat=application%2Fjson%3B+subtype%3Dgeojson%2Bx")
        );
    }
}
