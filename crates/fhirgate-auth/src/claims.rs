//! Principal extraction from decoded token claims.
//!
//! Signature verification happens before the gateway; this module only
//! decodes the payload segment of the bearer token and lifts the claims the
//! pipeline needs into a [`Principal`].

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;

use fhirgate_core::{GatewayError, GatewayResult};

const CLAIM_APPLICATION_ID: &str = "fhir_core_app_id";

const BEARER_PREFIX: &str = "Bearer ";

/// The raw claim set the gateway consumes.
#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    #[serde(default)]
    preferred_username: String,
    #[serde(default)]
    name: String,
    realm_access: Option<RealmAccess>,
    fhir_core_app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RealmAccess {
    roles: Vec<String>,
}

/// The authenticated caller, derived from token claims.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Stable user id (`sub`).
    pub subject: String,

    /// Login name (`preferred_username`).
    pub preferred_username: String,

    /// Human-readable display name (`name`).
    pub display_name: String,

    /// Realm roles (`realm_access.roles`).
    pub roles: Vec<String>,

    /// Deployed application configuration id (`fhir_core_app_id`).
    application_id: Option<String>,
}

impl Principal {
    /// Extracts a principal from an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when the header is not a bearer token, the
    /// token payload cannot be decoded, or a required claim is missing.
    pub fn from_bearer(authorization: &str) -> GatewayResult<Self> {
        let token = authorization
            .strip_prefix(BEARER_PREFIX)
            .ok_or_else(|| GatewayError::unauthorized("expected a bearer token"))?;
        let claims = decode_claims(token)?;
        Self::from_claims(&claims)
    }

    /// Builds a principal from an already decoded claims object.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when `sub` or `realm_access.roles` is absent.
    pub fn from_claims(claims: &Value) -> GatewayResult<Self> {
        let claims: TokenClaims = serde_json::from_value(claims.clone())
            .map_err(|e| GatewayError::unauthorized(format!("unreadable claims: {e}")))?;

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::unauthorized("token is missing the sub claim"))?;
        let roles = claims
            .realm_access
            .ok_or_else(|| {
                GatewayError::unauthorized("token is missing the realm_access.roles claim")
            })?
            .roles;

        Ok(Self {
            subject,
            preferred_username: claims.preferred_username,
            display_name: claims.name,
            roles,
            application_id: claims.fhir_core_app_id.filter(|s| !s.is_empty()),
        })
    }

    /// The application configuration id.
    ///
    /// # Errors
    ///
    /// Absence of the claim is a configuration error: the deployment mapped
    /// no application to this user.
    pub fn application_id(&self) -> GatewayResult<&str> {
        self.application_id.as_deref().ok_or_else(|| {
            GatewayError::configuration(format!(
                "user '{}' carries no {} claim",
                self.subject, CLAIM_APPLICATION_ID
            ))
        })
    }

    /// Exact membership test against the role set.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Decodes the payload segment of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns `Unauthorized` for malformed tokens.
pub fn decode_claims(token: &str) -> GatewayResult<Value> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| GatewayError::unauthorized("malformed token"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| GatewayError::unauthorized("token payload is not valid base64"))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| GatewayError::unauthorized("token payload is not valid JSON"))
}
