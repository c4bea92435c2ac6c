//! Practitioner graph resolver.
//!
//! Resolves the set of care teams, organizations, roles, groups,
//! affiliations and location hierarchies a user belongs to by walking the
//! upstream FHIR graph, starting from the `Practitioner` whose business
//! identifier equals the token subject.
//!
//! Every hop deduplicates on resource id, and an empty intermediate list
//! short-circuits the remaining fetches. A missing practitioner is not an
//! error; the returned details carry the [`PRACTITIONER_NOT_FOUND`] sentinel.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use fhirgate_core::client::{bundle_resources, resource_id, search_params, FhirClient};
use fhirgate_core::reference::{field_reference_ids, reference_id_part};
use fhirgate_core::GatewayResult;

/// Sentinel practitioner id for subjects with no `Practitioner` resource.
pub const PRACTITIONER_NOT_FOUND: &str = "PRACTITIONER_NOT_FOUND";

/// SNOMED code marking practitioner assignment groups.
pub const PRACTITIONER_GROUP_CODE: &str = "405623001";

/// SNOMED code system URL.
pub const SNOMED_SYSTEM: &str = "http://snomed.info/sct";

/// The resolved graph for one principal.
#[derive(Debug, Clone, Default)]
pub struct PractitionerDetails {
    /// The FHIR `Practitioner` resource id, or the not-found sentinel.
    pub practitioner_id: String,

    /// Care teams the practitioner participates in.
    pub care_teams: Vec<Value>,

    /// Organizations reached through care teams and roles, deduplicated.
    pub organizations: Vec<Value>,

    /// The practitioner's `PractitionerRole` resources.
    pub practitioner_roles: Vec<Value>,

    /// Assignment groups (`code = snomed|405623001`).
    pub groups: Vec<Value>,

    /// Affiliations of the reached organizations.
    pub organization_affiliations: Vec<Value>,

    /// Locations referenced by the affiliations.
    pub locations: Vec<Value>,

    /// Location hierarchy forest for those locations.
    pub location_hierarchies: Vec<Value>,
}

impl PractitionerDetails {
    /// Details for a subject without a `Practitioner` resource.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            practitioner_id: PRACTITIONER_NOT_FOUND.to_string(),
            ..Self::default()
        }
    }

    /// Whether this is the not-found sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.practitioner_id == PRACTITIONER_NOT_FOUND
    }

    /// Ids of the care teams.
    #[must_use]
    pub fn care_team_ids(&self) -> Vec<String> {
        resource_ids(&self.care_teams)
    }

    /// Ids of the organizations.
    #[must_use]
    pub fn organization_ids(&self) -> Vec<String> {
        resource_ids(&self.organizations)
    }

    /// Descendant location ids flattened out of the hierarchy forest.
    #[must_use]
    pub fn attributed_location_ids(&self) -> Vec<String> {
        attributed_location_ids(&self.location_hierarchies)
    }
}

/// Flattens location hierarchies into the list of descendant location ids.
///
/// Each hierarchy carries a `locationHierarchyTree.locationsHierarchy.
/// parentChildren` list of parent-to-children maps; the attributed
/// locations are every child identifier across the forest.
#[must_use]
pub fn attributed_location_ids(hierarchies: &[Value]) -> Vec<String> {
    let mut ids = Vec::new();
    for hierarchy in hierarchies {
        let parent_children = hierarchy
            .pointer("/locationHierarchyTree/locationsHierarchy/parentChildren")
            .and_then(Value::as_array);
        let Some(parent_children) = parent_children else {
            continue;
        };
        for entry in parent_children {
            let children = entry.get("childIdentifiers").and_then(Value::as_array);
            let Some(children) = children else { continue };
            for child in children.iter().filter_map(Value::as_str) {
                ids.push(reference_id_part(child).to_string());
            }
        }
    }
    ids
}

/// Resolves practitioner graphs against the upstream store.
pub struct PractitionerResolver {
    client: Arc<dyn FhirClient>,
}

impl PractitionerResolver {
    /// Creates a resolver over the shared upstream client.
    #[must_use]
    pub fn new(client: Arc<dyn FhirClient>) -> Self {
        Self { client }
    }

    /// Resolves the details for a token subject.
    ///
    /// # Errors
    ///
    /// Upstream failures propagate; an absent practitioner does not.
    pub async fn resolve(&self, subject: &str) -> GatewayResult<PractitionerDetails> {
        info!(subject = %subject, "Resolving practitioner graph");
        match self.practitioner_by_identifier(subject).await? {
            Some(practitioner) => self.details_for(&practitioner).await,
            None => {
                warn!(subject = %subject, "No practitioner found for subject");
                Ok(PractitionerDetails::not_found())
            }
        }
    }

    /// Supervisor expansion: details of every practitioner attributed to the
    /// subject through the location hierarchy.
    ///
    /// Attributed practitioners are the participants of care teams managed
    /// by organizations affiliated to any location in the subject's
    /// hierarchy, deduplicated against the subject's own care teams by id.
    ///
    /// # Errors
    ///
    /// Upstream failures propagate.
    pub async fn resolve_attributed(
        &self,
        subject: &str,
    ) -> GatewayResult<Vec<PractitionerDetails>> {
        let Some(practitioner) = self.practitioner_by_identifier(subject).await? else {
            warn!(subject = %subject, "No practitioner found for subject");
            return Ok(Vec::new());
        };
        let details = self.details_for(&practitioner).await?;

        let care_team_org_ids = managing_organization_ids(&details.care_teams);
        let affiliations = self
            .affiliations_by_primary_organizations(&care_team_org_ids)
            .await?;
        let location_ids = affiliation_first_location_ids(&affiliations);
        let hierarchies = self.location_hierarchies_by_ids(&location_ids).await?;
        let attributed_locations = attributed_location_ids(&hierarchies);
        let organization_ids = self
            .organization_ids_by_locations(&attributed_locations)
            .await?;
        let attributed_care_teams = self
            .care_teams_for_organizations(&organization_ids)
            .await?;

        let own_ids: HashSet<String> = details.care_team_ids().into_iter().collect();
        let mut care_teams = details.care_teams.clone();
        care_teams.extend(
            attributed_care_teams
                .into_iter()
                .filter(|ct| resource_id(ct).map_or(true, |id| !own_ids.contains(id))),
        );

        let mut attributed = Vec::new();
        for care_team in &care_teams {
            for member_id in practitioner_participant_ids(care_team) {
                if let Some(practitioner) = self.practitioner_by_identifier(&member_id).await? {
                    attributed.push(self.details_for(&practitioner).await?);
                }
            }
        }
        Ok(attributed)
    }

    async fn details_for(&self, practitioner: &Value) -> GatewayResult<PractitionerDetails> {
        let practitioner_id = resource_id(practitioner).unwrap_or_default().to_string();

        debug!(practitioner_id = %practitioner_id, "Fetching care teams");
        let care_teams = self.care_teams_for_practitioner(&practitioner_id).await?;
        let care_team_org_ids = managing_organization_ids(&care_teams);

        debug!(practitioner_id = %practitioner_id, "Fetching practitioner roles");
        let practitioner_roles = self.practitioner_roles_for(&practitioner_id).await?;
        let role_org_ids = role_organization_ids(&practitioner_roles);

        let care_team_orgs = self.organizations_by_ids(&care_team_org_ids).await?;
        let role_orgs = self.organizations_by_ids(&role_org_ids).await?;
        let organizations = dedup_by_id(care_team_orgs.into_iter().chain(role_orgs));

        let groups = self.groups_for_practitioner(&practitioner_id).await?;

        let mut all_org_ids = care_team_org_ids;
        all_org_ids.extend(role_org_ids);
        let all_org_ids = dedup_first_seen(all_org_ids);
        let organization_affiliations = self
            .affiliations_by_primary_organizations(&all_org_ids)
            .await?;

        // TODO: only the first location of each affiliation is attributed;
        // multi-location affiliations lose their remaining locations.
        let location_ids = affiliation_first_location_ids(&organization_affiliations);

        let location_hierarchies = self.location_hierarchies_by_ids(&location_ids).await?;
        let locations = self.locations_by_ids(&location_ids).await?;

        Ok(PractitionerDetails {
            practitioner_id,
            care_teams,
            organizations,
            practitioner_roles,
            groups,
            organization_affiliations,
            locations,
            location_hierarchies,
        })
    }

    async fn practitioner_by_identifier(&self, identifier: &str) -> GatewayResult<Option<Value>> {
        let bundle = self
            .client
            .search(
                "Practitioner",
                &search_params(&[("identifier", identifier)]),
            )
            .await?;
        let resource = bundle_resources(&bundle).next().cloned();
        Ok(resource)
    }

    async fn care_teams_for_practitioner(&self, practitioner_id: &str) -> GatewayResult<Vec<Value>> {
        let participant = format!("Practitioner/{practitioner_id}");
        let bundle = self
            .client
            .search("CareTeam", &search_params(&[("participant", &participant)]))
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn practitioner_roles_for(&self, practitioner_id: &str) -> GatewayResult<Vec<Value>> {
        let bundle = self
            .client
            .search(
                "PractitionerRole",
                &search_params(&[("practitioner", practitioner_id)]),
            )
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn organizations_by_ids(&self, ids: &[String]) -> GatewayResult<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .client
            .search("Organization", &search_params(&[("_id", &ids.join(","))]))
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn affiliations_by_primary_organizations(
        &self,
        organization_ids: &[String],
    ) -> GatewayResult<Vec<Value>> {
        if organization_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .client
            .search(
                "OrganizationAffiliation",
                &search_params(&[("primary-organization", &organization_ids.join(","))]),
            )
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn organization_ids_by_locations(
        &self,
        location_ids: &[String],
    ) -> GatewayResult<Vec<String>> {
        if location_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .client
            .search(
                "OrganizationAffiliation",
                &search_params(&[("location", &location_ids.join(","))]),
            )
            .await?;
        let ids = bundle_resources(&bundle)
            .flat_map(|affiliation| field_reference_ids(affiliation, "organization"))
            .collect();
        Ok(dedup_first_seen(ids))
    }

    async fn care_teams_for_organizations(
        &self,
        organization_ids: &[String],
    ) -> GatewayResult<Vec<Value>> {
        if organization_ids.is_empty() {
            return Ok(Vec::new());
        }
        let participant = organization_ids
            .iter()
            .map(|id| format!("Organization/{id}"))
            .collect::<Vec<_>>()
            .join(",");
        let bundle = self
            .client
            .search("CareTeam", &search_params(&[("participant", &participant)]))
            .await?;
        Ok(bundle_resources(&bundle)
            .filter(|ct| ct.get("managingOrganization").is_some())
            .cloned()
            .collect())
    }

    async fn location_hierarchies_by_ids(&self, location_ids: &[String]) -> GatewayResult<Vec<Value>> {
        if location_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .client
            .search(
                "LocationHierarchy",
                &search_params(&[("_id", &location_ids.join(","))]),
            )
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn locations_by_ids(&self, location_ids: &[String]) -> GatewayResult<Vec<Value>> {
        if location_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bundle = self
            .client
            .search("Location", &search_params(&[("_id", &location_ids.join(","))]))
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }

    async fn groups_for_practitioner(&self, practitioner_id: &str) -> GatewayResult<Vec<Value>> {
        let code = format!("{SNOMED_SYSTEM}|{PRACTITIONER_GROUP_CODE}");
        let bundle = self
            .client
            .search(
                "Group",
                &search_params(&[("member", practitioner_id), ("code", &code)]),
            )
            .await?;
        Ok(bundle_resources(&bundle).cloned().collect())
    }
}

fn resource_ids(resources: &[Value]) -> Vec<String> {
    resources
        .iter()
        .filter_map(resource_id)
        .map(str::to_string)
        .collect()
}

fn managing_organization_ids(care_teams: &[Value]) -> Vec<String> {
    let ids = care_teams
        .iter()
        .flat_map(|ct| field_reference_ids(ct, "managingOrganization"))
        .collect();
    dedup_first_seen(ids)
}

fn role_organization_ids(practitioner_roles: &[Value]) -> Vec<String> {
    let ids = practitioner_roles
        .iter()
        .flat_map(|role| field_reference_ids(role, "organization"))
        .collect();
    dedup_first_seen(ids)
}

/// The first `location` reference id of each affiliation.
fn affiliation_first_location_ids(affiliations: &[Value]) -> Vec<String> {
    affiliations
        .iter()
        .filter_map(|affiliation| field_reference_ids(affiliation, "location").into_iter().next())
        .collect()
}

/// Ids of `Practitioner/` participants of a care team.
fn practitioner_participant_ids(care_team: &Value) -> Vec<String> {
    let participants = care_team.get("participant").and_then(Value::as_array);
    let Some(participants) = participants else {
        return Vec::new();
    };
    participants
        .iter()
        .filter_map(|p| p.pointer("/member/reference").and_then(Value::as_str))
        .filter(|r| r.starts_with("Practitioner"))
        .map(|r| reference_id_part(r).to_string())
        .collect()
}

fn dedup_first_seen(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn dedup_by_id(resources: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    resources
        .filter(|r| {
            let id = resource_id(r).unwrap_or_default().to_string();
            seen.insert(id)
        })
        .collect()
}
