//! # fhirgate-auth
//!
//! The access-decision pipeline of the fhirgate proxy.
//!
//! This crate provides:
//! - Principal extraction from decoded bearer token claims
//! - The practitioner graph resolver with supervisor expansion
//! - Sync strategy loading and scope derivation
//! - The bounded subject-to-scope cache
//! - The access checker chain producing [`AccessDecision`] values
//! - The sync-scope request rewriter
//!
//! ## Modules
//!
//! - [`cache`] - TTL-bounded subject-to-scope cache
//! - [`checker`] - Role-based permission checker
//! - [`claims`] - Principal extracted from token claims
//! - [`decision`] - Access decision values and the checker trait
//! - [`resolver`] - Practitioner graph resolver
//! - [`scope`] - Sync strategy and scope derivation
//! - [`sync`] - Sync-scope search rewriting

pub mod cache;
pub mod checker;
pub mod claims;
pub mod decision;
pub mod resolver;
pub mod scope;
pub mod sync;

pub use cache::ScopeCache;
pub use checker::PermissionChecker;
pub use claims::Principal;
pub use decision::{AccessChecker, AccessDecision, RequestMutation};
pub use resolver::{PractitionerDetails, PractitionerResolver, PRACTITIONER_NOT_FOUND};
pub use scope::{SyncScope, SyncStrategy};
pub use sync::SyncScopeDecision;
