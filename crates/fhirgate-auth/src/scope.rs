//! Sync strategy and scope derivation.
//!
//! The deployed application configuration lives upstream as a `Composition`
//! pointing at a `Binary` whose base64 payload names the sync strategy. The
//! strategy selects which dimension of the practitioner graph scopes the
//! user's visible data.

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::debug;

use fhirgate_core::client::{bundle_resources, search_params, FhirClient};
use fhirgate_core::reference::reference_id_part;
use fhirgate_core::{GatewayError, GatewayResult};

use crate::resolver::PractitionerDetails;

const SYNC_STRATEGY_FIELD: &str = "syncStrategy";

/// The dimension along which a user's visible data is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Scope to the user's care teams.
    CareTeam,
    /// Scope to the user's organizations.
    Organization,
    /// Scope to the user's attributed locations.
    Location,
}

impl SyncStrategy {
    /// Canonical name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CareTeam => "CareTeam",
            Self::Organization => "Organization",
            Self::Location => "Location",
        }
    }
}

impl FromStr for SyncStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("careteam") {
            Ok(Self::CareTeam)
        } else if s.eq_ignore_ascii_case("organization") {
            Ok(Self::Organization)
        } else if s.eq_ignore_ascii_case("location") {
            Ok(Self::Location)
        } else {
            Err(GatewayError::configuration(format!(
                "unknown sync strategy '{s}'"
            )))
        }
    }
}

/// The identifiers scoping one principal's visible data.
///
/// Exactly the list matching the configured strategy is populated; a
/// populated-but-empty list means the principal has no assignments
/// (zero-scope).
#[derive(Debug, Clone)]
pub struct SyncScope {
    /// The configured strategy.
    pub strategy: SyncStrategy,

    /// Care-team ids, for the `CareTeam` strategy.
    pub care_team_ids: Vec<String>,

    /// Organization ids, for the `Organization` strategy.
    pub organization_ids: Vec<String>,

    /// Attributed location ids, for the `Location` strategy.
    pub location_ids: Vec<String>,
}

impl SyncScope {
    /// Projects the scope out of resolved practitioner details.
    #[must_use]
    pub fn from_details(strategy: SyncStrategy, details: &PractitionerDetails) -> Self {
        let mut scope = Self {
            strategy,
            care_team_ids: Vec::new(),
            organization_ids: Vec::new(),
            location_ids: Vec::new(),
        };
        match strategy {
            SyncStrategy::CareTeam => scope.care_team_ids = details.care_team_ids(),
            SyncStrategy::Organization => scope.organization_ids = details.organization_ids(),
            SyncStrategy::Location => scope.location_ids = details.attributed_location_ids(),
        }
        scope
    }

    /// Whether every dimension is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.care_team_ids.is_empty()
            && self.organization_ids.is_empty()
            && self.location_ids.is_empty()
    }
}

/// Loads the sync strategy configured for an application.
///
/// Looks up the `Composition` by identifier, follows its first section focus
/// to the configuration `Binary`, decodes the base64 payload and reads the
/// first `syncStrategy` entry.
///
/// # Errors
///
/// Returns a configuration error when the composition, binary or strategy is
/// missing, and propagates upstream failures.
pub async fn load_sync_strategy(
    client: &dyn FhirClient,
    application_id: &str,
) -> GatewayResult<SyncStrategy> {
    let bundle = client
        .search(
            "Composition",
            &search_params(&[("identifier", application_id)]),
        )
        .await?;
    let composition = bundle_resources(&bundle).next().ok_or_else(|| {
        GatewayError::configuration(format!(
            "no Composition resource found for application id '{application_id}'"
        ))
    })?;

    let binary_reference = composition
        .pointer("/section/0/focus/reference")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::configuration(format!(
                "Composition for application '{application_id}' has no configuration section"
            ))
        })?;
    let binary_id = reference_id_part(binary_reference);
    debug!(application_id = %application_id, binary_id = %binary_id, "Loading application config binary");

    let binary = client.read("Binary", binary_id).await?;
    let strategy = sync_strategy_from_binary(&binary)?;
    strategy.parse().map_err(|_: GatewayError| {
        GatewayError::configuration(format!(
            "sync strategy not configured; confirm the fhir_core_app_id attribute matches the \
             configuration identifier for application '{application_id}'"
        ))
    })
}

/// Extracts the raw strategy string from a configuration `Binary`.
fn sync_strategy_from_binary(binary: &Value) -> GatewayResult<String> {
    let data = binary
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::configuration("configuration Binary carries no data"))?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| GatewayError::configuration(format!("configuration payload: {e}")))?;
    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::configuration(format!("configuration payload: {e}")))?;

    Ok(payload
        .get(SYNC_STRATEGY_FIELD)
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct ConfigClient {
        composition: Option<Value>,
        binary: Option<Value>,
    }

    #[async_trait]
    impl FhirClient for ConfigClient {
        async fn search(
            &self,
            resource_type: &str,
            _params: &[(String, String)],
        ) -> GatewayResult<Value> {
            assert_eq!(resource_type, "Composition");
            let entries: Vec<Value> = self
                .composition
                .iter()
                .map(|c| json!({"resource": c}))
                .collect();
            Ok(json!({"resourceType": "Bundle", "entry": entries}))
        }

        async fn read(&self, resource_type: &str, id: &str) -> GatewayResult<Value> {
            assert_eq!(resource_type, "Binary");
            assert_eq!(id, "bin-1");
            self.binary
                .clone()
                .ok_or_else(|| GatewayError::upstream("Binary not found"))
        }

        async fn create(&self, resource: &Value) -> GatewayResult<Value> {
            Ok(resource.clone())
        }
    }

    fn composition() -> Value {
        json!({
            "resourceType": "Composition",
            "id": "comp-1",
            "section": [{"focus": {"reference": "Binary/bin-1"}}]
        })
    }

    fn binary_with(payload: Value) -> Value {
        json!({
            "resourceType": "Binary",
            "id": "bin-1",
            "data": STANDARD.encode(payload.to_string())
        })
    }

    #[test]
    fn test_strategy_parse_case_insensitive() {
        assert_eq!("CareTeam".parse::<SyncStrategy>().unwrap(), SyncStrategy::CareTeam);
        assert_eq!("careteam".parse::<SyncStrategy>().unwrap(), SyncStrategy::CareTeam);
        assert_eq!("ORGANIZATION".parse::<SyncStrategy>().unwrap(), SyncStrategy::Organization);
        assert_eq!("location".parse::<SyncStrategy>().unwrap(), SyncStrategy::Location);
        assert!("team".parse::<SyncStrategy>().is_err());
        assert!("".parse::<SyncStrategy>().is_err());
    }

    #[test]
    fn test_scope_projection() {
        let details = PractitionerDetails {
            practitioner_id: "prac-1".to_string(),
            care_teams: vec![json!({"resourceType": "CareTeam", "id": "ct-1"})],
            organizations: vec![
                json!({"resourceType": "Organization", "id": "org-1"}),
                json!({"resourceType": "Organization", "id": "org-2"}),
            ],
            ..PractitionerDetails::default()
        };

        let scope = SyncScope::from_details(SyncStrategy::Organization, &details);
        assert_eq!(scope.organization_ids, vec!["org-1", "org-2"]);
        assert!(scope.care_team_ids.is_empty());
        assert!(!scope.is_empty());

        let scope = SyncScope::from_details(SyncStrategy::Location, &details);
        assert!(scope.location_ids.is_empty());
        assert!(scope.is_empty());
    }

    #[tokio::test]
    async fn test_load_sync_strategy() {
        let client = ConfigClient {
            composition: Some(composition()),
            binary: Some(binary_with(json!({"syncStrategy": ["Organization"]}))),
        };
        let strategy = load_sync_strategy(&client, "app-a").await.unwrap();
        assert_eq!(strategy, SyncStrategy::Organization);
    }

    #[tokio::test]
    async fn test_load_sync_strategy_missing_composition() {
        let client = ConfigClient {
            composition: None,
            binary: None,
        };
        let err = load_sync_strategy(&client, "app-a").await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("app-a"));
    }

    #[tokio::test]
    async fn test_load_sync_strategy_blank_strategy() {
        let client = ConfigClient {
            composition: Some(composition()),
            binary: Some(binary_with(json!({"syncStrategy": []}))),
        };
        let err = load_sync_strategy(&client, "app-a").await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }
}
