//! Patient compartment membership.
//!
//! Audit events are patient-scoped when the touched resource belongs to a
//! Patient compartment. Membership follows the R4
//! `CompartmentDefinition/patient` linkage fields, extended by an
//! operator-supplied parameter set.

use std::collections::BTreeSet;

use serde_json::Value;

use fhirgate_core::reference::{collect_references, reference_id_part};
use fhirgate_core::RequestReader;

/// Resource fields linking a resource type into the Patient compartment.
///
/// Field names, not search parameter names; `Condition.subject` rather than
/// the `patient` search parameter.
fn compartment_fields(resource_type: &str) -> Option<&'static [&'static str]> {
    let fields: &[&str] = match resource_type {
        "Account" => &["subject"],
        "AdverseEvent" => &["subject"],
        "AllergyIntolerance" => &["patient", "recorder", "asserter"],
        "Appointment" => &["actor"],
        "AppointmentResponse" => &["actor"],
        "AuditEvent" => &["patient"],
        "Basic" => &["subject", "author"],
        "BodyStructure" => &["patient"],
        "CarePlan" => &["subject", "performer"],
        "CareTeam" => &["subject", "participant"],
        "ChargeItem" => &["subject"],
        "Claim" => &["patient", "payee"],
        "ClaimResponse" => &["patient"],
        "ClinicalImpression" => &["subject"],
        "Communication" => &["subject", "sender", "recipient"],
        "CommunicationRequest" => &["subject", "sender", "recipient", "requester"],
        "Composition" => &["subject", "author", "attester"],
        "Condition" => &["subject", "asserter"],
        "Consent" => &["patient"],
        "Coverage" => &["policyHolder", "subscriber", "beneficiary", "payor"],
        "DetectedIssue" => &["patient"],
        "DeviceRequest" => &["subject", "performer"],
        "DeviceUseStatement" => &["subject"],
        "DiagnosticReport" => &["subject"],
        "DocumentManifest" => &["subject", "author", "recipient"],
        "DocumentReference" => &["subject", "author"],
        "Encounter" => &["subject"],
        "EnrollmentRequest" => &["candidate"],
        "EpisodeOfCare" => &["patient"],
        "ExplanationOfBenefit" => &["patient", "payee"],
        "FamilyMemberHistory" => &["patient"],
        "Flag" => &["subject"],
        "Goal" => &["subject"],
        "Group" => &["member"],
        "ImagingStudy" => &["subject"],
        "Immunization" => &["patient"],
        "ImmunizationEvaluation" => &["patient"],
        "ImmunizationRecommendation" => &["patient"],
        "Invoice" => &["subject", "recipient"],
        "List" => &["subject", "source"],
        "MeasureReport" => &["subject"],
        "Media" => &["subject"],
        "MedicationAdministration" => &["subject", "performer"],
        "MedicationDispense" => &["subject", "receiver"],
        "MedicationRequest" => &["subject"],
        "MedicationStatement" => &["subject"],
        "NutritionOrder" => &["patient"],
        "Observation" => &["subject", "performer"],
        "Patient" => &[],
        "Procedure" => &["subject", "performer"],
        "Provenance" => &["patient"],
        "QuestionnaireResponse" => &["subject", "author", "source"],
        "RelatedPerson" => &["patient"],
        "RequestGroup" => &["subject", "participant"],
        "ResearchSubject" => &["individual"],
        "RiskAssessment" => &["subject"],
        "Schedule" => &["actor"],
        "ServiceRequest" => &["subject", "performer"],
        "Specimen" => &["subject"],
        "SupplyDelivery" => &["patient"],
        "SupplyRequest" => &["requester"],
        "VisionPrescription" => &["patient"],
        _ => return None,
    };
    Some(fields)
}

/// Search parameters whose values name compartment owners.
const OWNER_SEARCH_PARAMS: &[&str] = &["patient", "subject"];

/// Determines the Patient compartment owners of resources and searches.
#[derive(Debug, Clone, Default)]
pub struct PatientCompartment {
    additional_params: Vec<String>,
}

impl PatientCompartment {
    /// Compartment over the standard linkage fields only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds operator-supplied linkage fields and owner search parameters.
    #[must_use]
    pub fn with_additional_params(mut self, params: Vec<String>) -> Self {
        self.additional_params = params;
        self
    }

    /// The `Patient/<id>` owners of a resource. A Patient owns itself.
    #[must_use]
    pub fn owners_of(&self, resource: &Value) -> BTreeSet<String> {
        let mut owners = BTreeSet::new();
        let type_name = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or("");

        if type_name == "Patient" {
            if let Some(id) = resource.get("id").and_then(Value::as_str) {
                owners.insert(format!("Patient/{id}"));
            }
            return owners;
        }

        let Some(fields) = compartment_fields(type_name) else {
            return owners;
        };
        for field in fields
            .iter()
            .copied()
            .chain(self.additional_params.iter().map(String::as_str))
        {
            let Some(value) = resource.get(field) else {
                continue;
            };
            let mut refs = Vec::new();
            collect_references(value, &mut refs);
            for reference in refs {
                if let Some(rest) = reference.strip_prefix("Patient/") {
                    owners.insert(format!("Patient/{rest}"));
                }
            }
        }
        owners
    }

    /// Owners named in a request's search parameters.
    ///
    /// Accepts `Patient/<id>` references, bare ids, comma-joined value
    /// lists and modifier suffixes on the parameter name.
    #[must_use]
    pub fn owners_from_params(&self, request: &RequestReader) -> BTreeSet<String> {
        let mut owners = BTreeSet::new();
        for (name, values) in request.parameters() {
            let base_name = name.split(':').next().unwrap_or(name);
            let recognized = OWNER_SEARCH_PARAMS.contains(&base_name)
                || self.additional_params.iter().any(|p| p == base_name);
            if !recognized {
                continue;
            }
            for value in values {
                for candidate in value.split(',') {
                    if candidate.is_empty() {
                        continue;
                    }
                    if candidate.contains('/') {
                        if candidate.starts_with("Patient/") {
                            owners.insert(candidate.to_string());
                        }
                    } else {
                        owners.insert(format!("Patient/{}", reference_id_part(candidate)));
                    }
                }
            }
        }
        owners
    }
}
