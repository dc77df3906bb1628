//! PostgreSQL implementation of EventLedger.
//!
//! The `PRIMARY KEY` on the idempotency key is the atomic serialization
//! point for concurrent duplicate delivery: `INSERT ... ON CONFLICT DO
//! NOTHING` means the first writer wins and everyone else observes the
//! stored record.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    CycleId, DomainError, ErrorCode, IdempotencyKey, SubscriptionId, Timestamp,
};
use crate::domain::ledger::{EventKind, LedgerEvent};
use crate::ports::{EventLedger, EventStream, RecordOutcome};

/// Events fetched per page by `unprocessed_since`.
const PAGE_SIZE: i64 = 100;

/// PostgreSQL implementation of the EventLedger port.
pub struct PostgresEventLedger {
    pool: PgPool,
}

impl PostgresEventLedger {
    /// Creates a new ledger with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a ledger event.
#[derive(Debug, sqlx::FromRow)]
struct LedgerEventRow {
    idempotency_key: String,
    subscription_id: Uuid,
    kind: String,
    cycle_id: Option<Uuid>,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
    processed: bool,
}

impl TryFrom<LedgerEventRow> for LedgerEvent {
    type Error = DomainError;

    fn try_from(row: LedgerEventRow) -> Result<Self, Self::Error> {
        let kind = EventKind::parse(&row.kind).ok_or_else(|| {
            DomainError::new(
                ErrorCode::StorageError,
                format!("Invalid event kind: {}", row.kind),
            )
        })?;
        let key = IdempotencyKey::new(row.idempotency_key)
            .map_err(|e| DomainError::new(ErrorCode::StorageError, e.to_string()))?;

        Ok(LedgerEvent {
            idempotency_key: key,
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            kind,
            cycle_id: row.cycle_id.map(CycleId::from_uuid),
            payload: row.payload,
            received_at: Timestamp::from_datetime(row.received_at),
            processed: row.processed,
        })
    }
}

/// Paging cursor for the lazy unprocessed-event stream.
struct PageCursor {
    pool: PgPool,
    since: Timestamp,
    last_received: DateTime<Utc>,
    last_key: String,
    buffer: VecDeque<LedgerEvent>,
    exhausted: bool,
}

async fn fetch_page(cursor: &mut PageCursor) -> Result<(), DomainError> {
    let rows = sqlx::query_as::<_, LedgerEventRow>(
        r#"
        SELECT * FROM ledger_events
        WHERE processed = FALSE
          AND received_at >= $1
          AND (received_at > $2 OR (received_at = $2 AND idempotency_key > $3))
        ORDER BY received_at ASC, idempotency_key ASC
        LIMIT $4
        "#,
    )
    .bind(cursor.since.as_datetime())
    .bind(cursor.last_received)
    .bind(&cursor.last_key)
    .bind(PAGE_SIZE)
    .fetch_all(&cursor.pool)
    .await
    .map_err(|e| DomainError::storage(format!("Failed to page ledger events: {}", e)))?;

    cursor.exhausted = (rows.len() as i64) < PAGE_SIZE;
    if let Some(last) = rows.last() {
        cursor.last_received = last.received_at;
        cursor.last_key = last.idempotency_key.clone();
    }
    for row in rows {
        cursor.buffer.push_back(LedgerEvent::try_from(row)?);
    }
    Ok(())
}

#[async_trait]
impl EventLedger for PostgresEventLedger {
    async fn record(&self, event: LedgerEvent) -> Result<RecordOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events (
                idempotency_key, subscription_id, kind, cycle_id,
                payload, received_at, processed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(event.idempotency_key.as_str())
        .bind(event.subscription_id.as_uuid())
        .bind(event.kind.as_str())
        .bind(event.cycle_id.map(|c| *c.as_uuid()))
        .bind(&event.payload)
        .bind(event.received_at.as_datetime())
        .bind(event.processed)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to record event: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(RecordOutcome::Recorded(event));
        }

        // Lost the insert race or redelivered: load the stored record and
        // decide between idempotent duplicate and integrity conflict.
        let existing = self
            .find_by_key(&event.idempotency_key)
            .await?
            .ok_or_else(|| {
                DomainError::storage("Conflicting event vanished between insert and read")
            })?;

        if existing.is_duplicate_of(&event) {
            Ok(RecordOutcome::Duplicate(existing))
        } else {
            Err(DomainError::duplicate_key_conflict(
                event.idempotency_key.as_str(),
            ))
        }
    }

    async fn mark_processed(&self, key: &IdempotencyKey) -> Result<(), DomainError> {
        sqlx::query(r#"UPDATE ledger_events SET processed = TRUE WHERE idempotency_key = $1"#)
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to mark event processed: {}", e)))?;
        Ok(())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEvent>, DomainError> {
        let row = sqlx::query_as::<_, LedgerEventRow>(
            r#"SELECT * FROM ledger_events WHERE idempotency_key = $1"#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to load event: {}", e)))?;

        row.map(LedgerEvent::try_from).transpose()
    }

    async fn unprocessed_since(&self, since: Timestamp) -> Result<EventStream, DomainError> {
        let cursor = PageCursor {
            pool: self.pool.clone(),
            since,
            last_received: *since.minus_secs(1).as_datetime(),
            last_key: String::new(),
            buffer: VecDeque::new(),
            exhausted: false,
        };

        let stream = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.buffer.is_empty() && !cursor.exhausted {
                fetch_page(&mut cursor).await?;
            }
            match cursor.buffer.pop_front() {
                Some(event) => Ok(Some((event, cursor))),
                None => Ok(None),
            }
        });

        Ok(Box::pin(stream))
    }
}
