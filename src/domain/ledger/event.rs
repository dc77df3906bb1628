//! Ledger event model.
//!
//! Every input to the engine - gateway callbacks, user cancellation
//! requests, scheduler fires, reconciliation sweeps - and every outbound
//! action taken enters the append-only ledger first. The idempotency key
//! is the sole dedup point for at-least-once delivery, and unprocessed
//! entries are what reconciliation replays after a crash.

use crate::domain::foundation::{CycleId, IdempotencyKey, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Kind of a ledger event.
///
/// The first five are inputs to the state machine. `ChargeRequested` is
/// the durable write-ahead record of an outbound gateway charge: written
/// before the call is issued and marked processed once a matching outcome
/// has been applied, so a crash in the window between the two is detected
/// by reconciliation as ambiguous rather than silently lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Gateway reported a successful charge for a cycle.
    ChargeSucceeded,

    /// Gateway reported a failed charge for a cycle.
    ChargeFailed,

    /// User requested cancellation.
    CancelRequested,

    /// Scheduler fire: a renewal or dunning charge attempt is due.
    RenewalDue,

    /// Scheduler fire: the grace period has elapsed.
    ExpireGrace,

    /// Reconciliation sweep audit record.
    ReconcileTick,

    /// Outbound action record: a charge was about to be issued.
    ChargeRequested,
}

impl EventKind {
    /// Stable string form used for storage and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChargeSucceeded => "charge_succeeded",
            EventKind::ChargeFailed => "charge_failed",
            EventKind::CancelRequested => "cancel_requested",
            EventKind::RenewalDue => "renewal_due",
            EventKind::ExpireGrace => "expire_grace",
            EventKind::ReconcileTick => "reconcile_tick",
            EventKind::ChargeRequested => "charge_requested",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "charge_succeeded" => Some(EventKind::ChargeSucceeded),
            "charge_failed" => Some(EventKind::ChargeFailed),
            "cancel_requested" => Some(EventKind::CancelRequested),
            "renewal_due" => Some(EventKind::RenewalDue),
            "expire_grace" => Some(EventKind::ExpireGrace),
            "reconcile_tick" => Some(EventKind::ReconcileTick),
            "charge_requested" => Some(EventKind::ChargeRequested),
            _ => None,
        }
    }

    /// Returns true for kinds the state machine consumes directly.
    pub fn drives_state_machine(&self) -> bool {
        !matches!(self, EventKind::ReconcileTick | EventKind::ChargeRequested)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single ledger entry. Immutable once processed; retained for audit and
/// reconciliation replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Gateway-assigned or locally generated idempotency key. Unique.
    pub idempotency_key: IdempotencyKey,

    /// Subscription the event applies to.
    pub subscription_id: SubscriptionId,

    /// What happened.
    pub kind: EventKind,

    /// Billing cycle the event applies to, for charge-related kinds.
    pub cycle_id: Option<CycleId>,

    /// Raw payload as delivered (or as constructed for local events).
    pub payload: serde_json::Value,

    /// When the event was received or locally generated.
    pub received_at: Timestamp,

    /// Set once the event has been fully applied.
    pub processed: bool,
}

impl LedgerEvent {
    /// Creates an unprocessed event.
    pub fn new(
        idempotency_key: IdempotencyKey,
        subscription_id: SubscriptionId,
        kind: EventKind,
        cycle_id: Option<CycleId>,
        payload: serde_json::Value,
        received_at: Timestamp,
    ) -> Self {
        Self {
            idempotency_key,
            subscription_id,
            kind,
            cycle_id,
            payload,
            received_at,
            processed: false,
        }
    }

    /// Outbound charge write-ahead record for one attempt on a billing
    /// cycle.
    pub fn charge_requested(
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
        attempt: u32,
        received_at: Timestamp,
    ) -> Self {
        Self::new(
            IdempotencyKey::for_charge_request(&cycle_id, attempt),
            subscription_id,
            EventKind::ChargeRequested,
            Some(cycle_id),
            serde_json::json!({
                "cycle_id": cycle_id.to_string(),
                "attempt": attempt,
            }),
            received_at,
        )
    }

    /// The attempt number carried in the payload, when present.
    pub fn attempt(&self) -> Option<u32> {
        self.payload
            .get("attempt")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    /// Charge outcome observed directly on the gateway call.
    pub fn charge_outcome(
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
        attempt: u32,
        kind: EventKind,
        reason: Option<String>,
        received_at: Timestamp,
    ) -> Self {
        Self::new(
            IdempotencyKey::for_charge_outcome(&cycle_id, attempt),
            subscription_id,
            kind,
            Some(cycle_id),
            serde_json::json!({
                "cycle_id": cycle_id.to_string(),
                "attempt": attempt,
                "reason": reason,
                "source": "gateway_call",
            }),
            received_at,
        )
    }

    /// Charge outcome derived by reconciliation from an idempotent status
    /// query, as opposed to a gateway callback.
    pub fn reconciled_outcome(
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
        attempt: u32,
        kind: EventKind,
        received_at: Timestamp,
    ) -> Self {
        Self::new(
            IdempotencyKey::for_reconciled_outcome(&cycle_id, attempt),
            subscription_id,
            kind,
            Some(cycle_id),
            serde_json::json!({
                "cycle_id": cycle_id.to_string(),
                "attempt": attempt,
                "source": "reconciliation",
            }),
            received_at,
        )
    }

    /// Returns true if another event is a logical duplicate of this one:
    /// same key with identical content.
    ///
    /// A key collision where this returns false is a
    /// `DuplicateKeyConflict` - a data integrity violation that is
    /// surfaced, never auto-resolved.
    pub fn is_duplicate_of(&self, other: &LedgerEvent) -> bool {
        self.idempotency_key == other.idempotency_key
            && self.subscription_id == other.subscription_id
            && self.kind == other.kind
            && self.cycle_id == other.cycle_id
            && self.payload == other.payload
    }
}
