//! BALP audit event synthesis.
//!
//! After a successful forward the operation is classified against the IHE
//! Basic Audit Log Pattern profiles and one or more `AuditEvent` resources
//! are written to the upstream store. Emission never affects the client
//! response: failures are logged and swallowed.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error};
use url::form_urlencoded;

use fhirgate_core::client::FhirClient;
use fhirgate_core::{RequestReader, RestOperation};

use fhirgate_auth::Principal;

use crate::compartment::PatientCompartment;

const CS_AUDIT_EVENT_TYPE: &str = "http://terminology.hl7.org/CodeSystem/audit-event-type";
const CS_RESTFUL_INTERACTION: &str = "http://hl7.org/fhir/restful-interaction";
const CS_AUDIT_ENTITY_TYPE: &str = "http://terminology.hl7.org/CodeSystem/audit-entity-type";
const CS_OBJECT_ROLE: &str = "http://terminology.hl7.org/CodeSystem/object-role";
const CS_BALP_ENTITY_TYPE: &str = "https://profiles.ihe.net/ITI/BALP/CodeSystem/BasicAuditEntityType";
const CS_DICOM: &str = "http://dicom.nema.org/resources/ontology/DCM";
const CS_PARTICIPATION_TYPE: &str = "http://terminology.hl7.org/CodeSystem/v3-ParticipationType";

const DEVICE_IDENTIFIER_SYSTEM: &str = "https://fhirgate.org/devices";
const PRACTITIONER_IDENTIFIER_SYSTEM: &str = "https://fhirgate.org/practitioners";
const DELETE_IDENTIFIER_SYSTEM: &str = "https://fhirgate.org/delete";

/// IP address code for `AuditEvent.agent.network.type`.
const NETWORK_TYPE_IP: &str = "2";

/// BALP audit profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalpProfile {
    /// Creation without patient owners.
    BasicCreate,
    /// Creation within a patient compartment.
    PatientCreate,
    /// Read without patient owners.
    BasicRead,
    /// Read within a patient compartment.
    PatientRead,
    /// Update without patient owners.
    BasicUpdate,
    /// Update within a patient compartment.
    PatientUpdate,
    /// Deletion without patient owners.
    BasicDelete,
    /// Deletion within a patient compartment.
    PatientDelete,
    /// Search without patient owners.
    BasicQuery,
    /// Search within a patient compartment.
    PatientQuery,
}

impl BalpProfile {
    /// The profile URL recorded in `meta.profile`.
    #[must_use]
    pub fn url(&self) -> &'static str {
        match self {
            Self::BasicCreate => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.Create"
            }
            Self::PatientCreate => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.PatientCreate"
            }
            Self::BasicRead => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.Read"
            }
            Self::PatientRead => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.PatientRead"
            }
            Self::BasicUpdate => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.Update"
            }
            Self::PatientUpdate => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.PatientUpdate"
            }
            Self::BasicDelete => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.Delete"
            }
            Self::PatientDelete => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.PatientDelete"
            }
            Self::BasicQuery => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.Query"
            }
            Self::PatientQuery => {
                "https://profiles.ihe.net/ITI/BALP/StructureDefinition/IHE.BasicAudit.PatientQuery"
            }
        }
    }

    /// The `AuditEvent.action` code.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::BasicCreate | Self::PatientCreate => "C",
            Self::BasicRead | Self::PatientRead => "R",
            Self::BasicUpdate | Self::PatientUpdate => "U",
            Self::BasicDelete | Self::PatientDelete => "D",
            Self::BasicQuery | Self::PatientQuery => "E",
        }
    }

    /// Whether this is a patient-scoped profile.
    #[must_use]
    pub fn is_patient(&self) -> bool {
        matches!(
            self,
            Self::PatientCreate
                | Self::PatientRead
                | Self::PatientUpdate
                | Self::PatientDelete
                | Self::PatientQuery
        )
    }

    fn is_delete(&self) -> bool {
        matches!(self, Self::BasicDelete | Self::PatientDelete)
    }
}

/// Builds the audit-event user agent reference for a principal.
#[must_use]
pub fn user_reference(principal: &Principal) -> Value {
    json!({
        "type": "Practitioner",
        "display": principal.display_name,
        "identifier": {
            "system": PRACTITIONER_IDENTIFIER_SYSTEM,
            "value": principal.preferred_username
        }
    })
}

/// Synthesizes and emits BALP audit events for one request.
pub struct AuditSynthesizer {
    client: Arc<dyn FhirClient>,
    compartment: PatientCompartment,
    user_who: Value,
    started_at: OffsetDateTime,
}

impl AuditSynthesizer {
    /// Creates a synthesizer; the construction instant becomes the period
    /// start of every emitted event.
    #[must_use]
    pub fn new(client: Arc<dyn FhirClient>, user_who: Value) -> Self {
        Self {
            client,
            compartment: PatientCompartment::new(),
            user_who,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Replaces the compartment table, e.g. with extra owner parameters.
    #[must_use]
    pub fn with_compartment(mut self, compartment: PatientCompartment) -> Self {
        self.compartment = compartment;
        self
    }

    /// Synthesizes and emits the audit events for a successful forward.
    pub async fn process(&self, request: &RequestReader, response_body: Option<&str>) {
        let events = self.synthesize(request, response_body);
        self.emit(events).await;
    }

    /// Classifies the operation and builds the audit events.
    ///
    /// `response_body` is only consulted for create and update operations.
    #[must_use]
    pub fn synthesize(&self, request: &RequestReader, response_body: Option<&str>) -> Vec<Value> {
        match request.rest_operation() {
            RestOperation::SearchType | RestOperation::SearchSystem | RestOperation::GetPage => {
                self.query_events(request)
            }
            RestOperation::Read | RestOperation::Vread => self.read_events(request),
            RestOperation::Create => self.write_events(
                request,
                response_body,
                BalpProfile::BasicCreate,
                BalpProfile::PatientCreate,
            ),
            RestOperation::Update => self.write_events(
                request,
                response_body,
                BalpProfile::BasicUpdate,
                BalpProfile::PatientUpdate,
            ),
            RestOperation::Delete => self.delete_events(request),
            _ => Vec::new(),
        }
    }

    /// Persists each event upstream; failures are logged and swallowed.
    pub async fn emit(&self, events: Vec<Value>) {
        for event in events {
            if let Err(e) = self.client.create(&event).await {
                error!(error = %e, "Failed to store audit event");
            }
        }
    }

    fn query_events(&self, request: &RequestReader) -> Vec<Value> {
        let owners = self.compartment.owners_from_params(request);
        if owners.is_empty() {
            return vec![self.query_event(request, BalpProfile::BasicQuery, None)];
        }
        owners
            .into_iter()
            .map(|owner| self.query_event(request, BalpProfile::PatientQuery, Some(&owner)))
            .collect()
    }

    fn read_events(&self, request: &RequestReader) -> Vec<Value> {
        let resource_id = match request.resource_id() {
            Some(id) => format!("{}/{id}", request.resource_name()),
            None => request.request_path().to_string(),
        };
        let owners = self.compartment.owners_from_params(request);
        if owners.is_empty() {
            return vec![self.resource_event(request, BalpProfile::BasicRead, &resource_id, &[])];
        }
        owners
            .into_iter()
            .map(|owner| {
                self.resource_event(
                    request,
                    BalpProfile::PatientRead,
                    &resource_id,
                    &[owner],
                )
            })
            .collect()
    }

    fn write_events(
        &self,
        request: &RequestReader,
        response_body: Option<&str>,
        basic: BalpProfile,
        patient: BalpProfile,
    ) -> Vec<Value> {
        let resource: Value = response_body
            .and_then(|body| serde_json::from_str(body).ok())
            .unwrap_or_else(|| json!({}));
        let resource_id = self.storage_resource_id(request, &resource);
        let owners = self.compartment.owners_of(&resource);
        self.create_update_delete_events(request, &resource_id, owners, basic, patient)
    }

    fn delete_events(&self, request: &RequestReader) -> Vec<Value> {
        // The response body is never read for deletes; the audited resource
        // is reconstructed from the request path.
        let pseudo = json!({
            "resourceType": request.resource_name(),
            "id": request.resource_id().unwrap_or_default()
        });
        let resource_id = self.storage_resource_id(request, &pseudo);
        let owners = self.compartment.owners_of(&pseudo);
        self.create_update_delete_events(
            request,
            &resource_id,
            owners,
            BalpProfile::BasicDelete,
            BalpProfile::PatientDelete,
        )
    }

    fn create_update_delete_events(
        &self,
        request: &RequestReader,
        resource_id: &str,
        owners: BTreeSet<String>,
        basic: BalpProfile,
        patient: BalpProfile,
    ) -> Vec<Value> {
        if owners.is_empty() {
            vec![self.resource_event(request, basic, resource_id, &[])]
        } else {
            let owners: Vec<String> = owners.into_iter().collect();
            vec![self.resource_event(request, patient, resource_id, &owners)]
        }
    }

    /// `ResourceType/id` for the data entity, preferring the request path.
    fn storage_resource_id(&self, request: &RequestReader, resource: &Value) -> String {
        if let Some(id) = request.resource_id() {
            return format!("{}/{id}", request.resource_name());
        }
        let type_name = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or("");
        let id = resource.get("id").and_then(Value::as_str).unwrap_or("");
        format!("{type_name}/{id}")
    }

    fn query_event(
        &self,
        request: &RequestReader,
        profile: BalpProfile,
        owner: Option<&str>,
    ) -> Value {
        let mut event = self.common_event(request, profile);
        push_entity(&mut event, self.query_entity(request));
        if let Some(owner) = owner {
            push_entity(&mut event, patient_entity(owner, profile));
        }
        event
    }

    fn resource_event(
        &self,
        request: &RequestReader,
        profile: BalpProfile,
        resource_id: &str,
        owners: &[String],
    ) -> Value {
        let mut event = self.common_event(request, profile);
        push_entity(&mut event, data_entity(resource_id, profile));
        for owner in owners {
            push_entity(&mut event, patient_entity(owner, profile));
        }
        event
    }

    fn common_event(&self, request: &RequestReader, profile: BalpProfile) -> Value {
        let now = OffsetDateTime::now_utc();
        let operation = request.rest_operation();
        debug!(profile = ?profile, operation = ?operation, "Synthesizing audit event");

        json!({
            "resourceType": "AuditEvent",
            "meta": {"profile": [profile.url()]},
            "text": {
                "status": "generated",
                "div": "<div xmlns=\"http://www.w3.org/1999/xhtml\">Audit Event</div>"
            },
            "type": {
                "system": CS_AUDIT_EVENT_TYPE,
                "code": "rest",
                "display": "Restful Operation"
            },
            "subtype": [{
                "system": CS_RESTFUL_INTERACTION,
                "code": operation.code(),
                "display": operation.code()
            }],
            "action": profile.action(),
            "period": {
                "start": rfc3339(self.started_at),
                "end": rfc3339(now)
            },
            "recorded": rfc3339(now),
            "outcome": "0",
            "agent": [
                self.client_agent(request),
                self.server_agent(request),
                self.user_agent()
            ],
            "source": {
                "observer": {"display": request.fhir_server_base()}
            },
            "entity": [transaction_entity(request)]
        })
    }

    fn client_agent(&self, request: &RequestReader) -> Value {
        let address = request.remote_address().unwrap_or_default();
        json!({
            "type": {
                "coding": [{"system": CS_DICOM, "code": "110153", "display": "Source Role ID"}]
            },
            "who": {
                "type": "Device",
                "display": address,
                "identifier": {"system": DEVICE_IDENTIFIER_SYSTEM, "value": "fhirgate"}
            },
            "requestor": false,
            "network": {"address": address, "type": NETWORK_TYPE_IP}
        })
    }

    fn server_agent(&self, request: &RequestReader) -> Value {
        json!({
            "type": {
                "coding": [{"system": CS_DICOM, "code": "110152", "display": "Destination Role ID"}]
            },
            "who": {"display": request.fhir_server_base()},
            "requestor": false,
            "network": {"address": request.fhir_server_base()}
        })
    }

    fn user_agent(&self) -> Value {
        json!({
            "type": {
                "coding": [{
                    "system": CS_PARTICIPATION_TYPE,
                    "code": "IRCP",
                    "display": "information recipient"
                }]
            },
            "who": self.user_who.clone(),
            "requestor": true
        })
    }

    fn query_entity(&self, request: &RequestReader) -> Value {
        let description = format!("{} {}", request.method(), request.complete_url());

        let mut query = format!("{}/{}", request.fhir_server_base(), request.request_path());
        let mut first = true;
        for (name, values) in request.parameters() {
            for value in values {
                query.push(if first { '?' } else { '&' });
                first = false;
                query.extend(form_urlencoded::byte_serialize(name.as_bytes()));
                query.push('=');
                query.extend(form_urlencoded::byte_serialize(value.as_bytes()));
            }
        }

        json!({
            "type": {
                "system": CS_AUDIT_ENTITY_TYPE,
                "code": "2",
                "display": "System Object"
            },
            "role": {"system": CS_OBJECT_ROLE, "code": "24", "display": "Query"},
            "description": description,
            "query": STANDARD.encode(query)
        })
    }
}

fn transaction_entity(request: &RequestReader) -> Value {
    json!({
        "type": {"system": CS_BALP_ENTITY_TYPE, "code": "XrequestId"},
        "what": {"identifier": {"value": request.request_id()}}
    })
}

fn data_entity(resource_id: &str, profile: BalpProfile) -> Value {
    let what = if profile.is_delete() {
        deleted_resource_reference(resource_id)
    } else {
        json!({"reference": resource_id})
    };
    json!({
        "type": {"system": CS_AUDIT_ENTITY_TYPE, "code": "2", "display": "System Object"},
        "role": {"system": CS_OBJECT_ROLE, "code": "4", "display": "Domain Resource"},
        "what": what
    })
}

fn patient_entity(patient_id: &str, profile: BalpProfile) -> Value {
    let what = if profile.is_delete() {
        deleted_resource_reference(patient_id)
    } else {
        json!({"reference": patient_id})
    };
    json!({
        "type": {"system": CS_AUDIT_ENTITY_TYPE, "code": "1", "display": "Person"},
        "role": {"system": CS_OBJECT_ROLE, "code": "1", "display": "Patient"},
        "what": what
    })
}

/// Reference for a resource that no longer exists.
fn deleted_resource_reference(resource_id: &str) -> Value {
    let resource_type = resource_id.split('/').next().unwrap_or_default();
    json!({
        "type": resource_type,
        "display": format!("DELETED {resource_id}"),
        "identifier": {"system": DELETE_IDENTIFIER_SYSTEM, "value": resource_id}
    })
}

fn push_entity(event: &mut Value, entity: Value) {
    if let Some(entities) = event.get_mut("entity").and_then(Value::as_array_mut) {
        entities.push(entity);
    }
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}
