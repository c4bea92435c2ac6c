//! Access decision values and the checker seam.
//!
//! A decision carries three facets: the grant verdict, an optional request
//! mutation applied before forwarding, and an optional post-processor run
//! against the upstream response.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use fhirgate_core::{GatewayResult, RequestReader};

use crate::claims::Principal;

/// Rewrites applied to the request before it is forwarded.
///
/// Each entry carries the complete value list for the named parameter;
/// pre-existing values are already folded in by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMutation {
    /// Parameter name to full value list.
    pub additional_parameters: BTreeMap<String, Vec<String>>,
}

impl RequestMutation {
    /// Applies the mutation to a request's parameter map.
    pub fn apply(&self, request: &mut RequestReader) {
        for (name, values) in &self.additional_parameters {
            request.set_parameter(name.clone(), values.clone());
        }
    }
}

/// Post-processing hook run after a successful forward.
pub trait PostProcessor: Send + Sync {
    /// Optionally rewrites the response body. `None` leaves it untouched.
    fn post_process(
        &self,
        request: &RequestReader,
        response_body: &[u8],
    ) -> GatewayResult<Option<Vec<u8>>>;
}

/// Outcome of an access check.
#[derive(Clone)]
pub struct AccessDecision {
    granted: bool,
    mutation: Option<RequestMutation>,
    post_processor: Option<Arc<dyn PostProcessor>>,
}

impl std::fmt::Debug for AccessDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessDecision")
            .field("granted", &self.granted)
            .field("mutation", &self.mutation)
            .field("post_processor", &self.post_processor.is_some())
            .finish()
    }
}

impl AccessDecision {
    /// A grant with no mutation and no post-processing.
    #[must_use]
    pub fn granted_no_op() -> Self {
        Self {
            granted: true,
            mutation: None,
            post_processor: None,
        }
    }

    /// A denial.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            granted: false,
            mutation: None,
            post_processor: None,
        }
    }

    /// A grant carrying a mutation and/or post-processor.
    #[must_use]
    pub fn granted_with(
        mutation: Option<RequestMutation>,
        post_processor: Option<Arc<dyn PostProcessor>>,
    ) -> Self {
        Self {
            granted: true,
            mutation,
            post_processor,
        }
    }

    /// Returns `true` iff access was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// The request mutation, when one applies.
    #[must_use]
    pub fn mutation(&self) -> Option<&RequestMutation> {
        self.mutation.as_ref()
    }

    /// Runs the post-processor, when one is attached.
    ///
    /// # Errors
    ///
    /// Propagates post-processor failures.
    pub fn post_process(
        &self,
        request: &RequestReader,
        response_body: &[u8],
    ) -> GatewayResult<Option<Vec<u8>>> {
        match &self.post_processor {
            Some(processor) => processor.post_process(request, response_body),
            None => Ok(None),
        }
    }
}

/// One link of the access checker chain.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Decides whether the principal may perform the request.
    ///
    /// # Errors
    ///
    /// Returns configuration or upstream errors; a plain denial is a
    /// successful check with `granted = false`.
    async fn check(
        &self,
        request: &RequestReader,
        principal: &Principal,
    ) -> GatewayResult<AccessDecision>;
}
