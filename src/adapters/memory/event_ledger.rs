//! In-memory implementation of EventLedger.
//!
//! The idempotency-key map plays the role of the database unique
//! constraint: first writer wins, identical redelivery returns the stored
//! record, and a payload mismatch surfaces as `DuplicateKeyConflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, IdempotencyKey, Timestamp};
use crate::domain::ledger::LedgerEvent;
use crate::ports::{EventLedger, EventStream, RecordOutcome};

/// In-memory append-only ledger keyed by idempotency key.
#[derive(Default)]
pub struct InMemoryEventLedger {
    events: RwLock<HashMap<IdempotencyKey, LedgerEvent>>,
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, for test assertions.
    pub async fn all_events(&self) -> Vec<LedgerEvent> {
        let events = self.events.read().await;
        let mut all: Vec<LedgerEvent> = events.values().cloned().collect();
        all.sort_by_key(|e| e.received_at);
        all
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn record(&self, event: LedgerEvent) -> Result<RecordOutcome, DomainError> {
        let mut events = self.events.write().await;
        if let Some(existing) = events.get(&event.idempotency_key) {
            if existing.is_duplicate_of(&event) {
                return Ok(RecordOutcome::Duplicate(existing.clone()));
            }
            return Err(DomainError::duplicate_key_conflict(
                event.idempotency_key.as_str(),
            ));
        }
        events.insert(event.idempotency_key.clone(), event.clone());
        Ok(RecordOutcome::Recorded(event))
    }

    async fn mark_processed(&self, key: &IdempotencyKey) -> Result<(), DomainError> {
        let mut events = self.events.write().await;
        if let Some(event) = events.get_mut(key) {
            event.processed = true;
        }
        Ok(())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEvent>, DomainError> {
        Ok(self.events.read().await.get(key).cloned())
    }

    async fn unprocessed_since(&self, since: Timestamp) -> Result<EventStream, DomainError> {
        let events = self.events.read().await;
        let mut unprocessed: Vec<LedgerEvent> = events
            .values()
            .filter(|e| !e.processed && e.received_at >= since)
            .cloned()
            .collect();
        unprocessed.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.idempotency_key.as_str().cmp(b.idempotency_key.as_str()))
        });
        Ok(Box::pin(stream::iter(unprocessed.into_iter().map(Ok))))
    }
}
