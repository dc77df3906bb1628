//! EventLedger port - append-only idempotent event record.
//!
//! Every input and outbound action is written here before anything else
//! happens. The idempotency-key uniqueness constraint is the sole
//! serialization point for duplicate delivery and must be enforced
//! atomically at the storage layer.
//!
//! ## Why the write-ahead discipline matters
//!
//! A charge request is recorded durably before the gateway call is
//! issued. A crash after the write but before the call is safely
//! retryable; a crash after the call but before the outcome is applied
//! leaves an unprocessed `charge_requested` entry that reconciliation
//! detects as ambiguous rather than silently lost.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::foundation::{DomainError, IdempotencyKey, Timestamp};
use crate::domain::ledger::LedgerEvent;

/// Lazy, restartable sequence of ledger events ordered by received
/// timestamp. Restart by calling `unprocessed_since` again with the last
/// seen timestamp.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LedgerEvent, DomainError>> + Send>>;

/// Result of recording an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this key was seen; the event was appended.
    Recorded(LedgerEvent),
    /// The key already exists with an identical payload. The stored
    /// record is returned and nothing was written.
    Duplicate(LedgerEvent),
}

impl RecordOutcome {
    /// The stored event, whether fresh or pre-existing.
    pub fn event(&self) -> &LedgerEvent {
        match self {
            RecordOutcome::Recorded(event) | RecordOutcome::Duplicate(event) => event,
        }
    }

    /// Returns true for a duplicate delivery.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate(_))
    }
}

/// Port for the append-only event ledger.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Idempotently record an event.
    ///
    /// # Errors
    ///
    /// - `DuplicateKeyConflict` if the key exists with a different
    ///   payload - a data integrity violation that is surfaced, never
    ///   auto-resolved
    /// - `StorageError` on persistence failure
    async fn record(&self, event: LedgerEvent) -> Result<RecordOutcome, DomainError>;

    /// Mark an event as fully applied.
    ///
    /// Unknown keys are a no-op: marking is called from retry paths that
    /// may race with a concurrent worker having already settled the entry.
    async fn mark_processed(&self, key: &IdempotencyKey) -> Result<(), DomainError>;

    /// Find a recorded event by its idempotency key.
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEvent>, DomainError>;

    /// Stream unprocessed events received at or after `since`, ordered by
    /// received timestamp ascending.
    async fn unprocessed_since(&self, since: Timestamp) -> Result<EventStream, DomainError>;
}
