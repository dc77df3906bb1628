//! Parsed gateway callback payloads.
//!
//! The gateway delivers `(idempotency key, subscription id, event kind,
//! payload, timestamp)` tuples as signed JSON. This module holds the wire
//! shape and its conversion into a ledger event for ingestion.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{CycleId, IdempotencyKey, SubscriptionId, Timestamp};
use crate::domain::ledger::{EventKind, LedgerEvent};

use super::WebhookError;

/// A verified gateway callback, as delivered on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallback {
    /// Gateway-assigned event id, used as the idempotency key.
    pub id: String,

    /// Dotted event type string, e.g. `charge.succeeded`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp the gateway created the event at.
    pub created: i64,

    /// Event body.
    pub data: GatewayCallbackData,
}

/// Body of a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallbackData {
    /// Subscription the event applies to.
    pub subscription_id: SubscriptionId,

    /// Billing cycle the event applies to, for charge outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<CycleId>,

    /// Gateway-reported failure reason, for failed charges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GatewayCallback {
    /// Maps the dotted event type onto the engine's event kinds.
    pub fn parsed_kind(&self) -> Option<EventKind> {
        match self.event_type.as_str() {
            "charge.succeeded" => Some(EventKind::ChargeSucceeded),
            "charge.failed" => Some(EventKind::ChargeFailed),
            "subscription.cancel_requested" => Some(EventKind::CancelRequested),
            _ => None,
        }
    }

    /// Converts the callback into a ledger event for ingestion.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEventType` for event types the engine does not consume.
    /// - `ParseError` if a charge outcome is missing its cycle id.
    pub fn into_ledger_event(self, received_at: Timestamp) -> Result<LedgerEvent, WebhookError> {
        let kind = self
            .parsed_kind()
            .ok_or_else(|| WebhookError::UnsupportedEventType(self.event_type.clone()))?;

        if matches!(kind, EventKind::ChargeSucceeded | EventKind::ChargeFailed)
            && self.data.cycle_id.is_none()
        {
            return Err(WebhookError::ParseError(format!(
                "{} callback is missing cycle_id",
                self.event_type
            )));
        }

        let key = IdempotencyKey::new(self.id.clone())
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;
        let payload = serde_json::to_value(&self)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        Ok(LedgerEvent::new(
            key,
            self.data.subscription_id,
            kind,
            self.data.cycle_id,
            payload,
            received_at,
        ))
    }
}
