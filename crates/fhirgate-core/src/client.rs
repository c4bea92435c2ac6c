//! Upstream FHIR REST client seam.
//!
//! The resolver, strategy loader and audit synthesizer all talk to the
//! upstream store through this trait so tests can substitute in-memory
//! fakes. The production implementation lives in the server crate.

use async_trait::async_trait;
use serde_json::Value;

use crate::GatewayResult;

/// Minimal REST surface of the upstream FHIR store.
#[async_trait]
pub trait FhirClient: Send + Sync {
    /// Searches a resource type, returning the result `Bundle`.
    async fn search(
        &self,
        resource_type: &str,
        params: &[(String, String)],
    ) -> GatewayResult<Value>;

    /// Reads one resource instance.
    async fn read(&self, resource_type: &str, id: &str) -> GatewayResult<Value>;

    /// Creates a resource, returning the stored representation.
    async fn create(&self, resource: &Value) -> GatewayResult<Value>;
}

/// Iterates the resources of a search `Bundle`.
pub fn bundle_resources(bundle: &Value) -> impl Iterator<Item = &Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter_map(|entry| entry.get("resource"))
}

/// The `id` of a resource, when present.
#[must_use]
pub fn resource_id(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

/// The `resourceType` of a resource, or the empty string.
#[must_use]
pub fn resource_type(resource: &Value) -> &str {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Builds a search parameter list from `(name, value)` pairs.
#[must_use]
pub fn search_params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
        .collect()
}
