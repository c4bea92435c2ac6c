//! # fhirgate-core
//!
//! Shared building blocks for the fhirgate authorizing proxy.
//!
//! This crate provides:
//! - A read-only view over incoming FHIR REST requests
//! - REST operation classification
//! - FHIR reference parsing helpers
//! - The upstream FHIR client seam
//! - Tag constants used by the sync-scope rewriter
//! - The shared gateway error type
//!
//! ## Modules
//!
//! - [`client`] - Upstream FHIR REST client trait and bundle helpers
//! - [`error`] - Gateway error type with FHIR `OperationOutcome` responses
//! - [`operation`] - REST operation classification
//! - [`reference`] - FHIR reference parsing
//! - [`request`] - Request reader
//! - [`tags`] - Tag code systems and the zero-scope sentinel

pub mod client;
pub mod error;
pub mod operation;
pub mod reference;
pub mod request;
pub mod tags;

pub use client::FhirClient;
pub use error::GatewayError;
pub use operation::RestOperation;
pub use request::RequestReader;

/// Type alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;
