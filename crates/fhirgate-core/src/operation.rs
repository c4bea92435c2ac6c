//! REST operation classification.
//!
//! Incoming requests are classified once, from the HTTP method and the path
//! relative to the FHIR base, and the result drives both the checker chain
//! and the audit synthesizer.

use axum::http::Method;
use std::collections::BTreeMap;

/// The FHIR REST operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestOperation {
    /// Search on a resource collection (`GET /Patient?...`).
    SearchType,
    /// Search across the whole system (`GET /?...`).
    SearchSystem,
    /// Paging request carrying a `_getpages` parameter.
    GetPage,
    /// Instance read (`GET /Patient/123`).
    Read,
    /// Version read (`GET /Patient/123/_history/2`).
    Vread,
    /// Resource creation (`POST /Patient`).
    Create,
    /// Resource update (`PUT /Patient/123`).
    Update,
    /// Resource deletion (`DELETE /Patient/123`).
    Delete,
    /// Partial update (`PATCH /Patient/123`).
    Patch,
    /// Bundle submission (`POST /`).
    Transaction,
    /// Capability statement request (`GET /metadata`).
    Capabilities,
    /// Anything else; never audited.
    Other,
}

impl RestOperation {
    /// Classifies a request from its method, relative path segments and
    /// parameter map.
    #[must_use]
    pub fn classify(
        method: &Method,
        segments: &[&str],
        params: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        match *method {
            Method::GET => {
                if params.contains_key("_getpages") {
                    return Self::GetPage;
                }
                match segments {
                    [] => Self::SearchSystem,
                    ["metadata"] => Self::Capabilities,
                    [_] => Self::SearchType,
                    [_, _] => Self::Read,
                    [_, _, "_history", _] => Self::Vread,
                    _ => Self::Other,
                }
            }
            Method::POST => {
                if segments.is_empty() {
                    Self::Transaction
                } else {
                    Self::Create
                }
            }
            Method::PUT => Self::Update,
            Method::DELETE => Self::Delete,
            Method::PATCH => Self::Patch,
            _ => Self::Other,
        }
    }

    /// The `restful-interaction` code recorded in audit subtypes.
    ///
    /// Paging requests are recorded as `search-type`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SearchType | Self::GetPage => "search-type",
            Self::SearchSystem => "search-system",
            Self::Read => "read",
            Self::Vread => "vread",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Transaction => "transaction",
            Self::Capabilities => "capabilities",
            Self::Other => "unknown",
        }
    }
}
