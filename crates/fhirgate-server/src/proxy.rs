//! Upstream forwarding.
//!
//! Rebuilds the (possibly rewritten) request against the upstream base,
//! filtering hop-by-hop and credential headers in both directions. Upstream
//! failures pass through to the client untouched.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info};
use url::form_urlencoded;

use fhirgate_core::{GatewayError, GatewayResult, RequestReader};

/// An upstream response, buffered for post-processing and audit.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,

    /// Response headers, hop-by-hop headers removed.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body bytes.
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    /// Whether the upstream call succeeded (2xx).
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Forwards the request to the upstream store.
///
/// # Errors
///
/// Returns an upstream error when the request cannot be built or the
/// connection fails; HTTP-level failures are returned as a response.
pub async fn forward(
    http: &reqwest::Client,
    upstream_base: &str,
    request: &RequestReader,
) -> GatewayResult<UpstreamResponse> {
    let url = upstream_url(upstream_base, request);
    info!(method = %request.method(), url = %url, "Forwarding upstream");

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|e| GatewayError::internal(format!("unforwardable method: {e}")))?;

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if is_hop_by_hop_header(name.as_str())
            || is_credential_header(name.as_str())
            || name.as_str().eq_ignore_ascii_case("content-length")
        {
            debug!(header = %name, "Not forwarding header");
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::try_from(name.as_str()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }

    let response = http
        .request(method, &url)
        .headers(headers)
        .body(request.body().to_vec())
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                GatewayError::upstream(format!("upstream request timed out: {e}"))
            } else if e.is_connect() {
                GatewayError::upstream(format!("failed to connect upstream: {e}"))
            } else {
                GatewayError::upstream(format!("upstream request failed: {e}"))
            }
        })?;

    let status = response.status().as_u16();
    let mut response_headers = Vec::new();
    for (name, value) in response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_headers.push((name.as_str().to_string(), value.as_bytes().to_vec()));
        }
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::upstream(format!("unreadable upstream body: {e}")))?
        .to_vec();

    debug!(status = status, bytes = body.len(), "Upstream responded");
    Ok(UpstreamResponse {
        status,
        headers: response_headers,
        body,
    })
}

/// Converts a buffered upstream response into an axum response.
#[must_use]
pub fn into_response(upstream: UpstreamResponse) -> axum::response::Response {
    let mut builder = axum::response::Response::builder().status(upstream.status);
    if let Some(headers) = builder.headers_mut() {
        copy_headers(&upstream.headers, headers);
    }
    builder
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|_| axum::response::Response::new(axum::body::Body::empty()))
}

fn copy_headers(from: &[(String, Vec<u8>)], to: &mut HeaderMap) {
    for (name, value) in from {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_bytes(value),
        ) {
            to.insert(name, value);
        }
    }
}

/// The upstream URL for a request, query rebuilt from the parameter map.
#[must_use]
pub fn upstream_url(upstream_base: &str, request: &RequestReader) -> String {
    let mut url = format!(
        "{}/{}",
        upstream_base.trim_end_matches('/'),
        request.request_path()
    );
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, values) in request.parameters() {
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    let query = serializer.finish();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query);
    }
    url
}

/// Client credentials never travel upstream.
fn is_credential_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "authorization" | "cookie" | "set-cookie"
    )
}

/// Hop-by-hop headers per RFC 2616 section 13.5.1.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use fhirgate_core::request::parse_query;

    fn request(path: &str, query: &str) -> RequestReader {
        RequestReader::new(
            Method::GET,
            "http://gateway.example/fhir",
            path,
            parse_query(query),
            axum::http::HeaderMap::new(),
            Vec::new(),
            None,
        )
    }

    #[test]
    fn test_upstream_url_without_query() {
        let url = upstream_url("http://upstream.example/fhir", &request("Patient/1", ""));
        assert_eq!(url, "http://upstream.example/fhir/Patient/1");
    }

    #[test]
    fn test_upstream_url_encodes_query() {
        let url = upstream_url(
            "http://upstream.example/fhir/",
            &request("Patient", "name=Ada Lovelace"),
        );
        assert_eq!(
            url,
            "http://upstream.example/fhir/Patient?name=Ada+Lovelace"
        );
    }

    #[test]
    fn test_upstream_url_repeats_multi_values() {
        let url = upstream_url(
            "http://upstream.example/fhir",
            &request("Patient", "_tag=a&_tag=b"),
        );
        assert_eq!(url, "http://upstream.example/fhir/Patient?_tag=a&_tag=b");
    }

    #[test]
    fn test_is_credential_header() {
        assert!(is_credential_header("Authorization"));
        assert!(is_credential_header("cookie"));
        assert!(!is_credential_header("accept"));
    }

    #[test]
    fn test_is_hop_by_hop_header() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("content-type"));
    }

    #[test]
    fn test_upstream_response_success() {
        let ok = UpstreamResponse {
            status: 201,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(ok.is_success());

        let not_found = UpstreamResponse {
            status: 404,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(!not_found.is_success());
    }
}
