//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random SubscriptionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a SubscriptionId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier for a single billing cycle of a subscription.
///
/// A cycle is opened when a renewal charge is first attempted and settled by
/// the first applicable outcome. All gateway calls for the cycle (charge,
/// status query, refund) are keyed by this id, which is what makes retries
/// safe: the gateway deduplicates by cycle, and outcome events are matched
/// to the subscription's open cycle rather than by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Creates a new random CycleId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a CycleId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CycleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Idempotency key for a ledger event.
///
/// Either assigned by the payment gateway (callback events) or generated
/// locally with a deterministic scheme (scheduler fires, outbound actions)
/// so that redelivery and crash-refire produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Creates a key from a gateway-assigned or caller-supplied value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyField` if the value is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::empty_field("idempotency_key"));
        }
        Ok(Self(value))
    }

    /// Key for the outbound charge request of one attempt on a billing
    /// cycle.
    ///
    /// Attempt-scoped so each dunning retry gets its own write-ahead
    /// entry: an earlier attempt's settled outcome never masks a later
    /// attempt's ambiguity from reconciliation.
    pub fn for_charge_request(cycle_id: &CycleId, attempt: u32) -> Self {
        Self(format!("charge:{}:{}", cycle_id, attempt))
    }

    /// Key for the outbound refund request of a billing cycle.
    pub fn for_refund_request(cycle_id: &CycleId) -> Self {
        Self(format!("refund:{}", cycle_id))
    }

    /// Key for a scheduler task fire.
    ///
    /// Deterministic in (subscription, kind, generation) so a crash between
    /// firing and completion re-ingests as a duplicate instead of double
    /// processing.
    pub fn for_task_fire(subscription_id: &SubscriptionId, kind: &str, generation: u64) -> Self {
        Self(format!("task:{}:{}:{}", subscription_id, kind, generation))
    }

    /// Key for a charge outcome observed directly on the gateway call.
    ///
    /// The attempt number keeps outcomes of successive dunning attempts
    /// for the same cycle distinct.
    pub fn for_charge_outcome(cycle_id: &CycleId, attempt: u32) -> Self {
        Self(format!("outcome:{}:{}", cycle_id, attempt))
    }

    /// Key for a charge outcome derived by reconciliation from a status query.
    pub fn for_reconciled_outcome(cycle_id: &CycleId, attempt: u32) -> Self {
        Self(format!("reconcile:{}:{}", cycle_id, attempt))
    }

    /// Key for a reconciliation sweep audit record on a subscription.
    pub fn for_reconcile_tick(subscription_id: &SubscriptionId, sweep_unix_secs: u64) -> Self {
        Self(format!("reconcile_tick:{}:{}", subscription_id, sweep_unix_secs))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
