//! The request pipeline.
//!
//! Order per request: read claims, check access, apply the sync rewrite,
//! forward upstream, post-process, then synthesize audits. Audits are
//! emitted on a detached task so the client response is never delayed or
//! failed by the audit sink.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{info, warn};

use fhirgate_auth::{AccessChecker, PermissionChecker, Principal, ScopeCache};
use fhirgate_core::client::FhirClient;
use fhirgate_core::request::parse_query;
use fhirgate_core::{GatewayError, GatewayResult, RequestReader, RestOperation};

use crate::audit::{user_reference, AuditSynthesizer};
use crate::config::{AppConfig, SCOPE_CACHE_MAX_ENTRIES};
use crate::http_client::HttpFhirClient;
use crate::proxy;

/// Largest request/response body the gateway will buffer.
const MAX_BODY_BYTES: usize = 10_000_000;

/// Process-wide state shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<AppConfig>,

    /// Shared upstream client and connection pool.
    pub fhir_client: Arc<HttpFhirClient>,

    /// Subject-to-scope cache.
    pub scope_cache: Arc<ScopeCache>,
}

impl AppState {
    /// Builds the state from validated configuration.
    ///
    /// # Errors
    ///
    /// Fails when the upstream client cannot be constructed.
    pub fn new(config: AppConfig) -> GatewayResult<Self> {
        let fhir_client = Arc::new(HttpFhirClient::new(&config)?);
        let scope_cache = Arc::new(ScopeCache::new(
            config.scope_cache_ttl(),
            SCOPE_CACHE_MAX_ENTRIES,
        ));
        Ok(Self {
            config: Arc::new(config),
            fhir_client,
            scope_cache,
        })
    }
}

/// The gateway router: every route goes through the pipeline.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Entry point for every proxied request.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    match handle(state, request).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_server_error() {
                warn!(error = %e, "Request failed");
            }
            e.into_response()
        }
    }
}

async fn handle(state: AppState, request: Request) -> GatewayResult<Response> {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::bad_request(format!("unreadable request body: {e}")))?;

    let authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::unauthorized("missing Authorization header"))?;
    let principal = Principal::from_bearer(authorization)?;

    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(state.config.listen.as_str());
    let fhir_server_base = format!("http://{host}");

    let mut reader = RequestReader::new(
        parts.method.clone(),
        fhir_server_base,
        parts.uri.path().trim_start_matches('/').to_string(),
        parse_query(parts.uri.query().unwrap_or("")),
        parts.headers.clone(),
        body.to_vec(),
        remote_addr,
    );

    // Constructed before the check so the audit period covers the whole
    // request.
    let audit_client: Arc<dyn FhirClient> = state.fhir_client.clone();
    let synthesizer = AuditSynthesizer::new(audit_client, user_reference(&principal));

    let checker = PermissionChecker::new(state.fhir_client.clone(), state.scope_cache.clone())
        .with_dev_mode(state.config.dev_mode)
        .with_qualified_sync_tags(state.config.sync_tag_qualified);

    let decision = checker.check(&reader, &principal).await?;
    if !decision.is_granted() {
        info!(
            subject = %principal.subject,
            method = %reader.method(),
            path = %reader.request_path(),
            "Access denied"
        );
        return Err(GatewayError::forbidden(
            "user is not authorized for this operation",
        ));
    }

    if let Some(mutation) = decision.mutation() {
        mutation.apply(&mut reader);
    }

    let mut upstream = proxy::forward(
        state.fhir_client.http(),
        state.config.upstream_base(),
        &reader,
    )
    .await?;

    if upstream.is_success() {
        if let Some(rewritten) = decision.post_process(&reader, &upstream.body)? {
            upstream.body = rewritten;
        }

        let response_body = match reader.rest_operation() {
            RestOperation::Create | RestOperation::Update => {
                Some(String::from_utf8_lossy(&upstream.body).into_owned())
            }
            _ => None,
        };
        let events = synthesizer.synthesize(&reader, response_body.as_deref());
        if !events.is_empty() {
            tokio::spawn(async move { synthesizer.emit(events).await });
        }
    }

    Ok(proxy::into_response(upstream))
}
