//! PostgreSQL implementation of SubscriptionStore.
//!
//! Provides persistent storage for Subscription aggregates using
//! PostgreSQL. The optimistic version check is a conditional `UPDATE`
//! guarded on the version column, which is the atomic compare-and-set
//! the concurrency model requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    CycleId, DomainError, ErrorCode, SubscriptionId, Timestamp,
};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{CasResult, SubscriptionStore};

/// PostgreSQL implementation of the SubscriptionStore port.
///
/// Uses sqlx for type-safe database operations with connection pooling.
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    status: String,
    period_days: i32,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    next_due: Option<DateTime<Utc>>,
    retry_count: i32,
    cancel_requested: bool,
    open_cycle: Option<Uuid>,
    generation: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            status: parse_status(&row.status)?,
            period_days: row.period_days.max(0) as u32,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            next_due: row.next_due.map(Timestamp::from_datetime),
            retry_count: row.retry_count.max(0) as u32,
            cancel_requested: row.cancel_requested,
            open_cycle: row.open_cycle.map(CycleId::from_uuid),
            generation: row.generation.max(0) as u64,
            version: row.version.max(0) as u64,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
        })
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    match s {
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "active" => Ok(SubscriptionStatus::Active),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "grace_period" => Ok(SubscriptionStatus::GracePeriod),
        "canceled" => Ok(SubscriptionStatus::Canceled),
        "expired" => Ok(SubscriptionStatus::Expired),
        _ => Err(DomainError::new(
            ErrorCode::StorageError,
            format!("Invalid status value: {}", s),
        )),
    }
}

fn status_to_string(status: &SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Trialing => "trialing",
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::GracePeriod => "grace_period",
        SubscriptionStatus::Canceled => "canceled",
        SubscriptionStatus::Expired => "expired",
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, status, period_days, current_period_start, current_period_end,
                next_due, retry_count, cancel_requested, open_cycle, generation,
                version, created_at, updated_at, canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(status_to_string(&subscription.status))
        .bind(subscription.period_days as i32)
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.next_due.map(|t| *t.as_datetime()))
        .bind(subscription.retry_count as i32)
        .bind(subscription.cancel_requested)
        .bind(subscription.open_cycle.map(|c| *c.as_uuid()))
        .bind(subscription.generation as i64)
        .bind(subscription.version as i64)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("subscriptions_pkey") {
                    return DomainError::validation(
                        "subscription_id",
                        "Subscription already exists",
                    );
                }
            }
            DomainError::storage(format!("Failed to insert subscription: {}", e))
        })?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT * FROM subscriptions WHERE id = $1"#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to load subscription: {}", e)))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn update_if_version(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<CasResult, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $3,
                period_days = $4,
                current_period_start = $5,
                current_period_end = $6,
                next_due = $7,
                retry_count = $8,
                cancel_requested = $9,
                open_cycle = $10,
                generation = $11,
                updated_at = $12,
                canceled_at = $13,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(expected_version as i64)
        .bind(status_to_string(&subscription.status))
        .bind(subscription.period_days as i32)
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.next_due.map(|t| *t.as_datetime()))
        .bind(subscription.retry_count as i32)
        .bind(subscription.cancel_requested)
        .bind(subscription.open_cycle.map(|c| *c.as_uuid()))
        .bind(subscription.generation as i64)
        .bind(subscription.updated_at.as_datetime())
        .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to update subscription: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(CasResult::Updated);
        }

        // Distinguish a lost race from a missing row.
        match self.find_by_id(&subscription.id).await? {
            Some(_) => Ok(CasResult::VersionMismatch),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                "Subscription not found",
            )),
        }
    }

    async fn find_next_due_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT * FROM subscriptions
            WHERE status NOT IN ('canceled', 'expired')
              AND next_due IS NOT NULL
              AND next_due <= $1
            ORDER BY next_due ASC, id ASC
            "#,
        )
        .bind(cutoff.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to scan due subscriptions: {}", e)))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }
}
