//! Role-based permission checker.
//!
//! Grants a request when the principal carries the admin role
//! (`MANAGE_<RESOURCE>`) or the verb-specific role (`<VERB>_<RESOURCE>`),
//! delegating the sync-scope rewrite on grant. Bundle submissions are
//! checked entry by entry.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;
use tracing::{info, warn};

use fhirgate_core::client::FhirClient;
use fhirgate_core::{GatewayError, GatewayResult, RequestReader};

use crate::cache::ScopeCache;
use crate::claims::Principal;
use crate::decision::{AccessChecker, AccessDecision};
use crate::resolver::PractitionerResolver;
use crate::scope::{load_sync_strategy, SyncScope};
use crate::sync::SyncScopeDecision;

/// Permission checker backed by the practitioner graph.
pub struct PermissionChecker {
    client: Arc<dyn FhirClient>,
    resolver: PractitionerResolver,
    cache: Arc<ScopeCache>,
    dev_mode: bool,
    qualify_sync_tags: bool,
}

impl PermissionChecker {
    /// Creates a checker over the shared upstream client and scope cache.
    #[must_use]
    pub fn new(client: Arc<dyn FhirClient>, cache: Arc<ScopeCache>) -> Self {
        let resolver = PractitionerResolver::new(client.clone());
        Self {
            client,
            resolver,
            cache,
            dev_mode: false,
            qualify_sync_tags: false,
        }
    }

    /// Relaxes bundle role enforcement to logging.
    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Emits system-qualified sync tag values.
    #[must_use]
    pub fn with_qualified_sync_tags(mut self, qualify: bool) -> Self {
        self.qualify_sync_tags = qualify;
        self
    }

    fn user_has_role(principal: &Principal, resource_name: &str, verb: &str) -> bool {
        let resource = resource_name.to_uppercase();
        principal.has_role(&format!("MANAGE_{resource}"))
            || principal.has_role(&format!("{verb}_{resource}"))
    }

    /// Resolves the principal's scope, consulting the cache first.
    async fn scope_for(&self, principal: &Principal) -> GatewayResult<SyncScope> {
        if let Some(scope) = self.cache.get(&principal.subject).await {
            return Ok(scope);
        }

        let application_id = principal.application_id()?;
        let strategy = load_sync_strategy(self.client.as_ref(), application_id).await?;
        let details = self.resolver.resolve(&principal.subject).await?;
        let scope = SyncScope::from_details(strategy, &details);

        self.cache.insert(&principal.subject, scope.clone()).await;
        Ok(scope)
    }

    /// Checks every entry of a submitted bundle.
    fn process_bundle(
        &self,
        request: &RequestReader,
        principal: &Principal,
    ) -> GatewayResult<AccessDecision> {
        let bundle: Value = serde_json::from_slice(request.body())
            .map_err(|e| GatewayError::bad_request(format!("unreadable bundle: {e}")))?;
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut missing_role = false;
        for entry in &entries {
            let resource_type = entry
                .pointer("/resource/resourceType")
                .and_then(Value::as_str)
                .unwrap_or("");
            let verb = entry
                .pointer("/request/method")
                .and_then(Value::as_str)
                .unwrap_or("POST");

            if !Self::user_has_role(principal, resource_type, verb) {
                if self.dev_mode {
                    missing_role = true;
                    info!(
                        role = %format!("{verb}_{}", resource_type.to_uppercase()),
                        "Missing role for bundle entry"
                    );
                } else {
                    return Ok(AccessDecision::denied());
                }
            }
        }

        if missing_role {
            warn!(
                subject = %principal.subject,
                "Bundle granted with missing roles (dev mode)"
            );
        }
        Ok(AccessDecision::granted_no_op())
    }
}

#[async_trait]
impl AccessChecker for PermissionChecker {
    async fn check(
        &self,
        request: &RequestReader,
        principal: &Principal,
    ) -> GatewayResult<AccessDecision> {
        // Bundle submissions have no resource name segment.
        if request.method() == Method::POST && request.resource_name().is_empty() {
            return self.process_bundle(request, principal);
        }

        let verb = request.method().as_str();
        if !matches!(verb, "GET" | "DELETE" | "POST" | "PUT") {
            return Ok(AccessDecision::denied());
        }

        if !Self::user_has_role(principal, request.resource_name(), verb) {
            return Ok(AccessDecision::denied());
        }

        let scope = self.scope_for(principal).await?;
        Ok(SyncScopeDecision::new(scope)
            .with_system_qualification(self.qualify_sync_tags)
            .decide(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use fhirgate_core::request::parse_query;
    use fhirgate_core::tags::SEARCH_PARAM_TAG;
    use serde_json::json;
    use std::collections::HashMap;
    use time::Duration;

    // -------------------------------------------------------------------------
    // Mock Client
    // -------------------------------------------------------------------------

    struct MockClient {
        responses: HashMap<String, Value>,
    }

    impl MockClient {
        fn with_config_and_graph() -> Self {
            let mut responses = HashMap::new();
            responses.insert(
                "Composition?identifier=app-a".to_string(),
                bundle(vec![json!({
                    "resourceType": "Composition",
                    "id": "comp-1",
                    "section": [{"focus": {"reference": "Binary/bin-1"}}]
                })]),
            );
            responses.insert(
                "Practitioner?identifier=user-1".to_string(),
                bundle(vec![json!({"resourceType": "Practitioner", "id": "prac-1"})]),
            );
            responses.insert(
                "CareTeam?participant=Practitioner/prac-1".to_string(),
                bundle(vec![json!({
                    "resourceType": "CareTeam",
                    "id": "ct-1",
                    "managingOrganization": [{"reference": "Organization/org-1"}]
                })]),
            );
            responses.insert(
                "Organization?_id=org-1".to_string(),
                bundle(vec![json!({"resourceType": "Organization", "id": "org-1"})]),
            );
            Self { responses }
        }
    }

    fn bundle(resources: Vec<Value>) -> Value {
        json!({
            "resourceType": "Bundle",
            "entry": resources.into_iter().map(|r| json!({"resource": r})).collect::<Vec<_>>()
        })
    }

    #[async_trait]
    impl FhirClient for MockClient {
        async fn search(
            &self,
            resource_type: &str,
            params: &[(String, String)],
        ) -> GatewayResult<Value> {
            let query: Vec<String> = params.iter().map(|(n, v)| format!("{n}={v}")).collect();
            let key = format!("{resource_type}?{}", query.join("&"));
            Ok(self
                .responses
                .get(&key)
                .cloned()
                .unwrap_or_else(|| bundle(vec![])))
        }

        async fn read(&self, resource_type: &str, _id: &str) -> GatewayResult<Value> {
            assert_eq!(resource_type, "Binary");
            Ok(json!({
                "resourceType": "Binary",
                "id": "bin-1",
                "data": STANDARD.encode(json!({"syncStrategy": ["Organization"]}).to_string())
            }))
        }

        async fn create(&self, resource: &Value) -> GatewayResult<Value> {
            Ok(resource.clone())
        }
    }

    // -------------------------------------------------------------------------
    // Helper Functions
    // -------------------------------------------------------------------------

    fn principal(roles: &[&str]) -> Principal {
        Principal::from_claims(&json!({
            "sub": "user-1",
            "preferred_username": "ada",
            "name": "Ada Lovelace",
            "realm_access": {"roles": roles},
            "fhir_core_app_id": "app-a"
        }))
        .unwrap()
    }

    fn request(method: Method, path: &str, query: &str) -> RequestReader {
        RequestReader::new(
            method,
            "http://gateway.example/fhir",
            path,
            parse_query(query),
            HeaderMap::new(),
            Vec::new(),
            None,
        )
    }

    fn bundle_request(entries: Vec<(&str, &str)>) -> RequestReader {
        let entry_values: Vec<Value> = entries
            .into_iter()
            .map(|(method, resource_type)| {
                json!({
                    "resource": {"resourceType": resource_type},
                    "request": {"method": method, "url": resource_type}
                })
            })
            .collect();
        let body = json!({"resourceType": "Bundle", "type": "transaction", "entry": entry_values});
        RequestReader::new(
            Method::POST,
            "http://gateway.example/fhir",
            "",
            parse_query(""),
            HeaderMap::new(),
            body.to_string().into_bytes(),
            None,
        )
    }

    fn checker() -> PermissionChecker {
        PermissionChecker::new(
            Arc::new(MockClient::with_config_and_graph()),
            Arc::new(ScopeCache::new(Duration::minutes(5), 16)),
        )
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_verb_role_grants() {
        let decision = checker()
            .check(
                &request(Method::GET, "Observation", ""),
                &principal(&["GET_OBSERVATION"]),
            )
            .await
            .unwrap();
        assert!(decision.is_granted());
    }

    #[tokio::test]
    async fn test_manage_role_grants_every_verb() {
        let c = checker();
        let p = principal(&["MANAGE_OBSERVATION"]);
        for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE] {
            let path = if method == Method::GET { "Observation" } else { "Observation/obs-1" };
            let decision = c.check(&request(method, path, ""), &p).await.unwrap();
            assert!(decision.is_granted());
        }
    }

    #[tokio::test]
    async fn test_wrong_verb_denied() {
        let decision = checker()
            .check(
                &request(Method::DELETE, "Observation/abc", ""),
                &principal(&["GET_OBSERVATION"]),
            )
            .await
            .unwrap();
        assert!(!decision.is_granted());
    }

    #[tokio::test]
    async fn test_role_membership_is_exact() {
        let decision = checker()
            .check(
                &request(Method::GET, "Observation", ""),
                &principal(&["get_observation"]),
            )
            .await
            .unwrap();
        assert!(!decision.is_granted());
    }

    #[tokio::test]
    async fn test_patch_denied() {
        let decision = checker()
            .check(
                &request(Method::PATCH, "Observation/abc", ""),
                &principal(&["MANAGE_OBSERVATION"]),
            )
            .await
            .unwrap();
        assert!(!decision.is_granted());
    }

    #[tokio::test]
    async fn test_granted_search_carries_sync_mutation() {
        let decision = checker()
            .check(
                &request(Method::GET, "Patient", "name=Ada"),
                &principal(&["GET_PATIENT"]),
            )
            .await
            .unwrap();

        assert!(decision.is_granted());
        let mutation = decision.mutation().unwrap();
        assert_eq!(
            mutation.additional_parameters[SEARCH_PARAM_TAG],
            vec!["org-1"]
        );
    }

    #[tokio::test]
    async fn test_scope_cached_per_subject() {
        let cache = Arc::new(ScopeCache::new(Duration::minutes(5), 16));
        let c = PermissionChecker::new(
            Arc::new(MockClient::with_config_and_graph()),
            cache.clone(),
        );
        let p = principal(&["GET_PATIENT"]);

        c.check(&request(Method::GET, "Patient", ""), &p).await.unwrap();
        assert_eq!(cache.len().await, 1);

        // Second check hits the cache; the mock would return an empty
        // graph for any unexpected query, so an identical mutation
        // proves the cached scope was reused.
        let decision = c.check(&request(Method::GET, "Patient", ""), &p).await.unwrap();
        assert_eq!(
            decision.mutation().unwrap().additional_parameters[SEARCH_PARAM_TAG],
            vec!["org-1"]
        );
    }

    #[tokio::test]
    async fn test_missing_app_id_is_configuration_error() {
        let p = Principal::from_claims(&json!({
            "sub": "user-1",
            "realm_access": {"roles": ["GET_PATIENT"]}
        }))
        .unwrap();

        let err = checker()
            .check(&request(Method::GET, "Patient", ""), &p)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_bundle_all_roles_present() {
        let decision = checker()
            .check(
                &bundle_request(vec![("POST", "Patient"), ("PUT", "Observation")]),
                &principal(&["POST_PATIENT", "MANAGE_OBSERVATION"]),
            )
            .await
            .unwrap();
        assert!(decision.is_granted());
        assert!(decision.mutation().is_none());
    }

    #[tokio::test]
    async fn test_bundle_missing_role_denied() {
        let decision = checker()
            .check(
                &bundle_request(vec![("POST", "Patient"), ("POST", "Observation")]),
                &principal(&["POST_PATIENT"]),
            )
            .await
            .unwrap();
        assert!(!decision.is_granted());
    }

    #[tokio::test]
    async fn test_bundle_missing_role_granted_in_dev_mode() {
        let decision = checker()
            .with_dev_mode(true)
            .check(
                &bundle_request(vec![("POST", "Patient"), ("POST", "Observation")]),
                &principal(&["POST_PATIENT"]),
            )
            .await
            .unwrap();
        assert!(decision.is_granted());
    }

    #[tokio::test]
    async fn test_malformed_bundle_rejected() {
        let req = RequestReader::new(
            Method::POST,
            "http://gateway.example/fhir",
            "",
            parse_query(""),
            HeaderMap::new(),
            b"not json".to_vec(),
            None,
        );
        let err = checker()
            .check(&req, &principal(&["POST_PATIENT"]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest { .. }));
    }
}
