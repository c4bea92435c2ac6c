//! A read-only view over the incoming HTTP request.
//!
//! The reader is built once per request and handed to every downstream
//! component so nothing re-parses the URL. The parameter map is the one
//! mutable part: the pre-process phase may rewrite it before forwarding.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method};
use uuid::Uuid;

use crate::operation::RestOperation;

/// Header carrying the client-supplied transaction id.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// View over one incoming FHIR REST request.
#[derive(Debug, Clone)]
pub struct RequestReader {
    method: Method,
    fhir_server_base: String,
    path: String,
    params: BTreeMap<String, Vec<String>>,
    headers: HeaderMap,
    body: Vec<u8>,
    request_id: String,
    remote_addr: Option<String>,
    operation: RestOperation,
}

impl RequestReader {
    /// Builds a reader from request parts.
    ///
    /// `path` is relative to the FHIR base, without a leading slash.
    /// A request id is taken from `X-Request-Id` or generated.
    #[must_use]
    pub fn new(
        method: Method,
        fhir_server_base: impl Into<String>,
        path: impl Into<String>,
        params: BTreeMap<String, Vec<String>>,
        headers: HeaderMap,
        body: Vec<u8>,
        remote_addr: Option<String>,
    ) -> Self {
        let path = path.into();
        let request_id = headers
            .get(HEADER_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let operation = {
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            RestOperation::classify(&method, &segments, &params)
        };

        Self {
            method,
            fhir_server_base: fhir_server_base.into().trim_end_matches('/').to_string(),
            path,
            params,
            headers,
            body,
            request_id,
            remote_addr,
            operation,
        }
    }

    /// The HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The non-empty path segments relative to the FHIR base.
    fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// The resource type segment, or the empty string for bundle posts and
    /// system-level requests.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        self.path
            .split('/')
            .find(|s| !s.is_empty())
            .filter(|s| !s.starts_with('_') && !s.starts_with('$') && *s != "metadata")
            .unwrap_or("")
    }

    /// The resource id segment, when the request addresses an instance.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        let segments = self.segments();
        match segments.as_slice() {
            [_, id, ..] if !id.starts_with('_') && !id.starts_with('$') => Some(id),
            _ => None,
        }
    }

    /// The request path relative to the FHIR base.
    #[must_use]
    pub fn request_path(&self) -> &str {
        &self.path
    }

    /// The externally visible FHIR base URL of this gateway.
    #[must_use]
    pub fn fhir_server_base(&self) -> &str {
        &self.fhir_server_base
    }

    /// The complete request URL, rebuilt from the current parameter map.
    #[must_use]
    pub fn complete_url(&self) -> String {
        let mut url = format!("{}/{}", self.fhir_server_base, self.path);
        let query = self.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    /// The current query string, unescaped, rebuilt from the parameter map.
    #[must_use]
    pub fn query_string(&self) -> String {
        let mut out = String::new();
        for (name, values) in &self.params {
            for value in values {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push_str(name);
                out.push('=');
                out.push_str(value);
            }
        }
        out
    }

    /// The parameter map, name to ordered value list.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.params
    }

    /// Values of one parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&[String]> {
        self.params.get(name).map(Vec::as_slice)
    }

    /// Replaces the values of one parameter. Only valid during pre-process.
    pub fn set_parameter(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.params.insert(name.into(), values);
    }

    /// Looks up a request header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The transaction id of this request.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The remote network address, when known.
    #[must_use]
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// The classified REST operation.
    #[must_use]
    pub fn rest_operation(&self) -> RestOperation {
        self.operation
    }
}

/// Parses a raw query string into the reader's parameter map shape.
#[must_use]
pub fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = match pair.split_once('=') {
            Some((n, v)) => (n, v),
            None => (pair, ""),
        };
        let name = percent_decode(name);
        let value = percent_decode(value);
        params.entry(name).or_default().push(value);
    }
    params
}

/// Decodes percent escapes and `+` in a query component.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = &input[i + 1..i + 3];
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(method: Method, path: &str, query: &str) -> RequestReader {
        RequestReader::new(
            method,
            "http://gateway.example/fhir",
            path,
            parse_query(query),
            HeaderMap::new(),
            Vec::new(),
            Some("10.0.0.1".to_string()),
        )
    }

    #[test]
    fn test_resource_name_and_id() {
        let r = reader(Method::GET, "Patient/123", "");
        assert_eq!(r.resource_name(), "Patient");
        assert_eq!(r.resource_id(), Some("123"));
        assert_eq!(r.rest_operation(), RestOperation::Read);

        let r = reader(Method::GET, "Patient", "name=Ada");
        assert_eq!(r.resource_name(), "Patient");
        assert_eq!(r.resource_id(), None);
        assert_eq!(r.rest_operation(), RestOperation::SearchType);

        let r = reader(Method::POST, "", "");
        assert_eq!(r.resource_name(), "");
        assert_eq!(r.rest_operation(), RestOperation::Transaction);
    }

    #[test]
    fn test_complete_url() {
        let r = reader(Method::GET, "Patient", "name=Ada");
        assert_eq!(
            r.complete_url(),
            "http://gateway.example/fhir/Patient?name=Ada"
        );
    }

    #[test]
    fn test_parse_query_multi_value() {
        let params = parse_query("_tag=a&_tag=b&name=Ada");
        assert_eq!(params["_tag"], vec!["a", "b"]);
        assert_eq!(params["name"], vec!["Ada"]);
    }

    #[test]
    fn test_parse_query_escapes() {
        let params = parse_query("name=Ada%20Lovelace&q=a+b");
        assert_eq!(params["name"], vec!["Ada Lovelace"]);
        assert_eq!(params["q"], vec!["a b"]);
    }

    #[test]
    fn test_set_parameter_replaces() {
        let mut r = reader(Method::GET, "Patient", "_tag=x");
        r.set_parameter("_tag", vec!["x".to_string(), "y".to_string()]);
        assert_eq!(r.parameter("_tag").unwrap(), &["x", "y"]);
    }

    #[test]
    fn test_request_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, "req-42".parse().unwrap());
        let r = RequestReader::new(
            Method::GET,
            "http://gateway.example/fhir",
            "Patient",
            BTreeMap::new(),
            headers,
            Vec::new(),
            None,
        );
        assert_eq!(r.request_id(), "req-42");
    }

    #[test]
    fn test_request_id_generated() {
        let r = reader(Method::GET, "Patient", "");
        assert!(!r.request_id().is_empty());
    }
}
