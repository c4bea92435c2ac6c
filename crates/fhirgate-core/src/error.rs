//! Gateway error types.
//!
//! All request-handling failures funnel into [`GatewayError`]. The variant
//! determines the HTTP status returned to the client, rendered as a FHIR
//! `OperationOutcome`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors that can occur while authorizing, rewriting or forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request lacks valid authentication credentials (401).
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The authenticated user may not perform this operation (403).
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// The request is malformed (400).
    #[error("Bad request: {message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// The application configuration is missing or invalid (500).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An upstream FHIR call failed (502).
    #[error("Upstream error: {message}")]
    Upstream {
        /// Description of the upstream failure.
        message: String,
    },

    /// An unexpected internal error occurred (500).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl GatewayError {
    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `BadRequest` error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Upstream` error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::Forbidden { .. } | Self::BadRequest { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (severity, code) = match &self {
            Self::Unauthorized { .. } => ("error", "login"),
            Self::Forbidden { .. } => ("error", "forbidden"),
            Self::BadRequest { .. } => ("error", "invalid"),
            Self::Configuration { .. } => ("error", "invalid"),
            Self::Upstream { .. } => ("error", "exception"),
            Self::Internal { .. } => ("error", "exception"),
        };

        let operation_outcome = json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": severity,
                "code": code,
                "diagnostics": self.to_string()
            }]
        });

        (self.status(), Json(operation_outcome)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::unauthorized("missing bearer token");
        assert_eq!(err.to_string(), "Unauthorized: missing bearer token");

        let err = GatewayError::configuration("no sync strategy");
        assert_eq!(err.to_string(), "Configuration error: no sync strategy");
    }

    #[test]
    fn test_error_predicates() {
        assert!(GatewayError::forbidden("x").is_client_error());
        assert!(!GatewayError::forbidden("x").is_server_error());
        assert!(GatewayError::upstream("x").is_server_error());
        assert!(GatewayError::configuration("x").is_server_error());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::unauthorized("x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GatewayError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::configuration("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::upstream("x").status(), StatusCode::BAD_GATEWAY);
    }
}
