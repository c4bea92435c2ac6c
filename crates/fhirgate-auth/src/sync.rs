//! Sync-scope search rewriting.
//!
//! For list/search GETs on a resource collection the principal's scope is
//! turned into `_tag` filter values so the upstream server only returns
//! resources tagged for the user's care teams, organizations or locations.

use std::sync::Arc;

use tracing::debug;

use fhirgate_core::tags::{
    CARE_TEAM_TAG_URL, CODE_URL_VALUE_SEPARATOR, LOCATION_TAG_URL, ORGANIZATION_TAG_URL,
    PARAM_VALUES_SEPARATOR, SEARCH_PARAM_TAG, ZERO_SCOPE_SENTINEL,
};
use fhirgate_core::{GatewayResult, RequestReader};

use crate::decision::{AccessDecision, PostProcessor, RequestMutation};
use crate::scope::SyncScope;

/// The tag values contributed by one scope, with their code systems kept
/// aside for observability. Only the bare values travel on the wire unless
/// system qualification is switched on.
#[derive(Debug, Clone)]
pub struct SyncTagSummary {
    /// Wire values, in scope-dimension order.
    pub values: Vec<String>,

    /// Code system to contributing identifiers.
    pub systems: Vec<(&'static str, Vec<String>)>,
}

/// Grants sync-shaped requests and rewrites their `_tag` filter.
pub struct SyncScopeDecision {
    scope: SyncScope,
    qualify_system: bool,
}

impl SyncScopeDecision {
    /// Creates a decision source for one resolved scope.
    #[must_use]
    pub fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            qualify_system: false,
        }
    }

    /// Emits `system|code` values instead of bare identifiers.
    ///
    /// Off by default: the upstream server is known to ignore
    /// system-qualified tag searches.
    #[must_use]
    pub fn with_system_qualification(mut self, qualify: bool) -> Self {
        self.qualify_system = qualify;
        self
    }

    /// Whether a request is a list/search on a resource collection.
    ///
    /// True for GETs whose path relative to the FHIR base is exactly the
    /// resource type segment.
    #[must_use]
    pub fn is_sync_request(request: &RequestReader) -> bool {
        if request.method() != axum::http::Method::GET || request.resource_name().is_empty() {
            return false;
        }
        let path = request.request_path();
        let sections: Vec<&str> = path.split('/').collect();
        sections.len() == 1 || (sections.len() == 2 && sections[1].is_empty())
    }

    /// Produces the grant decision for a request, with the `_tag` rewrite
    /// attached when the request is sync-shaped.
    ///
    /// The rewrite appends: pre-existing `_tag` values are preserved behind
    /// the scope values. Rewriting is idempotent on the resulting
    /// identifier set.
    #[must_use]
    pub fn decide(self, request: &RequestReader) -> AccessDecision {
        if !Self::is_sync_request(request) {
            return AccessDecision::granted_with(None, Some(Arc::new(NoRewrite)));
        }

        let summary = self.sync_tags();
        debug!(
            path = %request.request_path(),
            systems = ?summary.systems,
            "Applying sync filters"
        );

        let mut values = vec![summary.values.join(PARAM_VALUES_SEPARATOR)];
        if let Some(existing) = request.parameter(SEARCH_PARAM_TAG) {
            values.extend(existing.iter().cloned());
        }

        let mut mutation = RequestMutation::default();
        mutation
            .additional_parameters
            .insert(SEARCH_PARAM_TAG.to_string(), values);

        AccessDecision::granted_with(Some(mutation), Some(Arc::new(NoRewrite)))
    }

    /// The tag values for this scope, sentinel included for zero-scope.
    #[must_use]
    pub fn sync_tags(&self) -> SyncTagSummary {
        let mut location_ids = self.scope.location_ids.clone();
        if self.scope.is_empty() {
            location_ids.push(ZERO_SCOPE_SENTINEL.to_string());
        }

        let mut summary = SyncTagSummary {
            values: Vec::new(),
            systems: Vec::new(),
        };
        self.add_tags(&mut summary, LOCATION_TAG_URL, &location_ids);
        self.add_tags(&mut summary, ORGANIZATION_TAG_URL, &self.scope.organization_ids);
        self.add_tags(&mut summary, CARE_TEAM_TAG_URL, &self.scope.care_team_ids);
        summary
    }

    fn add_tags(&self, summary: &mut SyncTagSummary, system: &'static str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        summary.systems.push((system, ids.to_vec()));
        for id in ids {
            if self.qualify_system {
                summary
                    .values
                    .push(format!("{system}{CODE_URL_VALUE_SEPARATOR}{id}"));
            } else {
                summary.values.push(id.clone());
            }
        }
    }
}

/// Post-processor that leaves the response body untouched.
struct NoRewrite;

impl PostProcessor for NoRewrite {
    fn post_process(
        &self,
        _request: &RequestReader,
        _response_body: &[u8],
    ) -> GatewayResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::SyncStrategy;
    use axum::http::{HeaderMap, Method};
    use fhirgate_core::request::parse_query;
    use std::collections::BTreeSet;

    fn scope(
        strategy: SyncStrategy,
        care_teams: &[&str],
        organizations: &[&str],
        locations: &[&str],
    ) -> SyncScope {
        SyncScope {
            strategy,
            care_team_ids: care_teams.iter().map(|s| s.to_string()).collect(),
            organization_ids: organizations.iter().map(|s| s.to_string()).collect(),
            location_ids: locations.iter().map(|s| s.to_string()).collect(),
        }
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

    fn tag_id_set(request: &RequestReader) -> BTreeSet<String> {
        request
            .parameter(SEARCH_PARAM_TAG)
            .unwrap_or(&[])
            .iter()
            .flat_map(|v| v.split(PARAM_VALUES_SEPARATOR))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_is_sync_request() {
        assert!(SyncScopeDecision::is_sync_request(&request(
            Method::GET,
            "Patient",
            ""
        )));
        assert!(SyncScopeDecision::is_sync_request(&request(
            Method::GET,
            "Patient/",
            ""
        )));
        assert!(!SyncScopeDecision::is_sync_request(&request(
            Method::GET,
            "Patient/123",
            ""
        )));
        assert!(!SyncScopeDecision::is_sync_request(&request(
            Method::POST,
            "Patient",
            ""
        )));
        assert!(!SyncScopeDecision::is_sync_request(&request(
            Method::POST,
            "",
            ""
        )));
    }

    #[test]
    fn test_rewrite_appends_scope_ids() {
        let decision = SyncScopeDecision::new(scope(
            SyncStrategy::Organization,
            &[],
            &["org-1", "org-2"],
            &[],
        ))
        .decide(&request(Method::GET, "Patient", "name=Ada"));

        assert!(decision.is_granted());
        let mutation = decision.mutation().unwrap();
        assert_eq!(
            mutation.additional_parameters[SEARCH_PARAM_TAG],
            vec!["org-1,org-2"]
        );
    }

    #[test]
    fn test_rewrite_preserves_existing_tags() {
        let mut req = request(Method::GET, "Observation", "_tag=keep-me");
        let decision = SyncScopeDecision::new(scope(
            SyncStrategy::CareTeam,
            &["ct-1"],
            &[],
            &[],
        ))
        .decide(&req);

        decision.mutation().unwrap().apply(&mut req);
        let ids = tag_id_set(&req);
        assert!(ids.contains("keep-me"));
        assert!(ids.contains("ct-1"));
    }

    #[test]
    fn test_zero_scope_injects_sentinel() {
        let mut req = request(Method::GET, "Encounter", "");
        let decision =
            SyncScopeDecision::new(scope(SyncStrategy::Location, &[], &[], &[])).decide(&req);

        decision.mutation().unwrap().apply(&mut req);
        let ids = tag_id_set(&req);
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(ZERO_SCOPE_SENTINEL));
    }

    #[test]
    fn test_rewrite_idempotent_on_id_set() {
        let make_scope = || scope(SyncStrategy::Organization, &[], &["org-1", "org-2"], &[]);

        let mut req = request(Method::GET, "Patient", "");
        SyncScopeDecision::new(make_scope())
            .decide(&req)
            .mutation()
            .unwrap()
            .apply(&mut req);
        let first = tag_id_set(&req);

        SyncScopeDecision::new(make_scope())
            .decide(&req)
            .mutation()
            .unwrap()
            .apply(&mut req);
        let second = tag_id_set(&req);

        assert_eq!(first, second);
    }

    #[test]
    fn test_non_sync_request_not_rewritten() {
        let decision = SyncScopeDecision::new(scope(
            SyncStrategy::Organization,
            &[],
            &["org-1"],
            &[],
        ))
        .decide(&request(Method::GET, "Patient/123", ""));

        assert!(decision.is_granted());
        assert!(decision.mutation().is_none());
    }

    #[test]
    fn test_system_qualification_toggle() {
        let summary = SyncScopeDecision::new(scope(
            SyncStrategy::Organization,
            &[],
            &["org-1"],
            &[],
        ))
        .with_system_qualification(true)
        .sync_tags();

        assert_eq!(
            summary.values,
            vec![format!("{ORGANIZATION_TAG_URL}|org-1")]
        );
    }

    #[test]
    fn test_systems_side_map() {
        let summary = SyncScopeDecision::new(scope(
            SyncStrategy::CareTeam,
            &["ct-1", "ct-2"],
            &[],
            &[],
        ))
        .sync_tags();

        assert_eq!(summary.values, vec!["ct-1", "ct-2"]);
        assert_eq!(
            summary.systems,
            vec![(CARE_TEAM_TAG_URL, vec!["ct-1".to_string(), "ct-2".to_string()])]
        );
    }
}
