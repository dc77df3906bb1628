//! IngestEventHandler - Command handler for external event ingestion.
//!
//! The ingress collaborator (webhook endpoint, message consumer) verifies
//! and parses deliveries, then hands the resulting ledger events here.
//! Ingestion is safe under concurrent duplicate delivery: the ledger's
//! idempotency-key constraint is the sole serialization point.

use std::sync::Arc;

use tracing::warn;

use crate::domain::foundation::DomainError;
use crate::domain::ledger::{EventKind, LedgerEvent};

use super::event_applier::{ApplyOutcome, EventApplier};

/// Result of ingesting one external event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event was recorded and applied (possibly as an idempotent
    /// no-op, e.g. for a terminal subscription or a settled cycle).
    Accepted,

    /// The idempotency key was already recorded and processed.
    Duplicate,

    /// The event was not ingestible.
    Rejected(String),
}

/// Handler for external event ingestion.
pub struct IngestEventHandler {
    applier: Arc<EventApplier>,
}

impl IngestEventHandler {
    pub fn new(applier: Arc<EventApplier>) -> Self {
        Self { applier }
    }

    /// Ingest one external event.
    ///
    /// # Errors
    ///
    /// - `DuplicateKeyConflict` when the key exists with a different
    ///   payload; surfaced to the caller, never auto-resolved
    /// - `StorageConflict` when the bounded optimistic retry loop is
    ///   exhausted; the delivery should be retried
    pub async fn handle(&self, event: LedgerEvent) -> Result<IngestOutcome, DomainError> {
        if let Err(reason) = validate(&event) {
            warn!(
                idempotency_key = %event.idempotency_key,
                event_kind = %event.kind,
                reason = %reason,
                "Rejected inbound event"
            );
            return Ok(IngestOutcome::Rejected(reason));
        }

        match self.applier.apply(event).await {
            Ok(ApplyOutcome::Applied) | Ok(ApplyOutcome::NoOp) => Ok(IngestOutcome::Accepted),
            Ok(ApplyOutcome::Duplicate) => Ok(IngestOutcome::Duplicate),
            Ok(ApplyOutcome::InvalidTransition(reason)) => Ok(IngestOutcome::Rejected(reason)),
            Err(err) if err.code == crate::domain::foundation::ErrorCode::SubscriptionNotFound => {
                Ok(IngestOutcome::Rejected(err.message))
            }
            Err(err) => Err(err),
        }
    }
}

/// Only externally deliverable kinds are ingestible; scheduler fires and
/// audit records enter through their own paths.
fn validate(event: &LedgerEvent) -> Result<(), String> {
    match event.kind {
        EventKind::CancelRequested => Ok(()),
        EventKind::ChargeSucceeded | EventKind::ChargeFailed => {
            if event.cycle_id.is_none() {
                Err(format!("{} event is missing its cycle id", event.kind))
            } else {
                Ok(())
            }
        }
        other => Err(format!("{} is not an ingestible event kind", other)),
    }
}
