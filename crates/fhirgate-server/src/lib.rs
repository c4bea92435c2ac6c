//! # fhirgate-server
//!
//! The authorizing reverse proxy: configuration, the reqwest-backed
//! upstream client, the BALP audit synthesizer and the axum handler that
//! wires the pipeline together.
//!
//! ## Modules
//!
//! - [`audit`] - BALP audit event synthesis and emission
//! - [`compartment`] - Patient compartment membership
//! - [`config`] - Environment-derived configuration
//! - [`handler`] - Request pipeline and application state
//! - [`http_client`] - Upstream FHIR REST client
//! - [`proxy`] - Upstream forwarding

pub mod audit;
pub mod compartment;
pub mod config;
pub mod handler;
pub mod http_client;
pub mod proxy;

pub use audit::{AuditSynthesizer, BalpProfile};
pub use compartment::PatientCompartment;
pub use config::AppConfig;
pub use handler::{router, AppState};
pub use http_client::HttpFhirClient;
