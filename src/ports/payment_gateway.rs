//! Payment gateway port for external charge processing.
//!
//! Defines the contract with the external payment gateway. All calls are
//! idempotent keyed by billing cycle id: issuing the same charge twice,
//! or querying status at any time, is always safe.
//!
//! # Design
//!
//! - **Gateway agnostic**: the interface works with any provider
//! - **Cycle-keyed idempotency**: retries and reconciliation re-queries
//!   never double-charge
//! - **Ambiguity is explicit**: `Pending` is a first-class outcome
//!   resolved only by idempotent re-query, never inferred from a timeout

use crate::domain::foundation::{CycleId, DomainError, ErrorCode, SubscriptionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a charge or status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// The charge settled successfully.
    Succeeded,

    /// The charge failed with a gateway-reported reason.
    Failed { reason: String },

    /// The gateway has not settled the charge yet. The caller must
    /// re-query later; this is never treated as success or failure.
    Pending,
}

impl ChargeOutcome {
    /// Returns true once the gateway has settled the charge either way.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ChargeOutcome::Pending)
    }
}

/// Port for the external payment gateway.
///
/// Charge issuance happens outside any lock held on the subscription
/// record and is bounded by a timeout at the call site; a timeout is an
/// ambiguous outcome for reconciliation, not a failure to roll back.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Issue the charge for a billing cycle. Idempotent per cycle.
    async fn charge(
        &self,
        subscription_id: &SubscriptionId,
        cycle_id: &CycleId,
    ) -> Result<ChargeOutcome, GatewayError>;

    /// Query the authoritative status of a cycle's charge. Idempotent;
    /// never causes a new charge.
    async fn query_status(&self, cycle_id: &CycleId) -> Result<ChargeOutcome, GatewayError>;

    /// Refund the charge for a billing cycle. Used only by cancellation
    /// flows. Idempotent per cycle.
    async fn refund(
        &self,
        subscription_id: &SubscriptionId,
        cycle_id: &CycleId,
    ) -> Result<(), GatewayError>;
}

/// Errors from gateway operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    /// Error code for categorization.
    pub code: GatewayErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Whether the operation can be retried.
    pub retryable: bool,
}

impl GatewayError {
    /// Create a new gateway error.
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NetworkError, message)
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::AuthenticationError, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Timeout, message)
    }

    /// Create a not found error.
    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorCode::NotFound, format!("{} not found", resource))
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for DomainError {
    fn from(err: GatewayError) -> Self {
        let code = match err.code {
            GatewayErrorCode::Timeout => ErrorCode::AmbiguousOutcome,
            _ if err.retryable => ErrorCode::ExternalUnavailable,
            _ => ErrorCode::InternalError,
        };
        DomainError::new(code, err.message)
    }
}

/// Gateway error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Network connectivity issue.
    NetworkError,

    /// API authentication failed.
    AuthenticationError,

    /// Rate limit exceeded.
    RateLimited,

    /// The call did not complete within the bound; the effect may or may
    /// not have happened.
    Timeout,

    /// Resource not found.
    NotFound,

    /// Provider API error.
    ProviderError,

    /// Unknown error.
    Unknown,
}

impl GatewayErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayErrorCode::NetworkError | GatewayErrorCode::RateLimited
        )
    }
}

impl std::fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorCode::NetworkError => "network_error",
            GatewayErrorCode::AuthenticationError => "authentication_error",
            GatewayErrorCode::RateLimited => "rate_limited",
            GatewayErrorCode::Timeout => "timeout",
            GatewayErrorCode::NotFound => "not_found",
            GatewayErrorCode::ProviderError => "provider_error",
            GatewayErrorCode::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
