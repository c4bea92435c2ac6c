//! Upstream FHIR REST client.
//!
//! One reqwest client backs both the resolver's configuration fetches and
//! the proxy forward path, sharing its connection pool across all workers.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use fhirgate_core::client::{resource_type, FhirClient};
use fhirgate_core::{GatewayError, GatewayResult};

use crate::config::AppConfig;

const FHIR_JSON: &str = "application/fhir+json";

/// reqwest-backed implementation of the upstream client seam.
pub struct HttpFhirClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFhirClient {
    /// Builds the shared client from gateway configuration.
    ///
    /// # Errors
    ///
    /// Fails when the reqwest client cannot be constructed.
    pub fn new(config: &AppConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.socket_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.max_connection_per_route)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.upstream_base().to_string(),
        })
    }

    /// The shared reqwest client, reused for proxy forwarding.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The upstream base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fhir_json(&self, response: reqwest::Response) -> GatewayResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(format!(
                "upstream returned {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::upstream(format!("unreadable upstream body: {e}")))
    }
}

#[async_trait]
impl FhirClient for HttpFhirClient {
    async fn search(
        &self,
        resource_type: &str,
        params: &[(String, String)],
    ) -> GatewayResult<Value> {
        let url = format!("{}/{resource_type}", self.base_url);
        debug!(url = %url, "Upstream search");
        let response = self
            .http
            .get(&url)
            .query(params)
            .header(ACCEPT, HeaderValue::from_static(FHIR_JSON))
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("search {resource_type}: {e}")))?;
        self.fhir_json(response).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> GatewayResult<Value> {
        let url = format!("{}/{resource_type}/{id}", self.base_url);
        debug!(url = %url, "Upstream read");
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static(FHIR_JSON))
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("read {resource_type}/{id}: {e}")))?;
        self.fhir_json(response).await
    }

    async fn create(&self, resource: &Value) -> GatewayResult<Value> {
        let type_name = resource_type(resource);
        let url = format!("{}/{type_name}", self.base_url);
        debug!(url = %url, "Upstream create");
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON))
            .json(resource)
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("create {type_name}: {e}")))?;
        self.fhir_json(response).await
    }
}
