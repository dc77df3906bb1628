//! PostgreSQL implementation of TaskStore.
//!
//! The `(subscription_id, kind)` primary key plus `ON CONFLICT DO
//! UPDATE` gives the at-most-one-task-per-kind invariant and atomic
//! generation-incrementing replacement across workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::domain::scheduler::{ScheduledTask, TaskKind};
use crate::ports::TaskStore;

/// PostgreSQL implementation of the TaskStore port.
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a scheduled task.
#[derive(Debug, sqlx::FromRow)]
struct ScheduledTaskRow {
    subscription_id: Uuid,
    kind: String,
    fire_at: DateTime<Utc>,
    generation: i64,
}

impl TryFrom<ScheduledTaskRow> for ScheduledTask {
    type Error = DomainError;

    fn try_from(row: ScheduledTaskRow) -> Result<Self, Self::Error> {
        let kind = TaskKind::parse(&row.kind).ok_or_else(|| {
            DomainError::new(
                ErrorCode::StorageError,
                format!("Invalid task kind: {}", row.kind),
            )
        })?;
        Ok(ScheduledTask {
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            kind,
            fire_at: Timestamp::from_datetime(row.fire_at),
            generation: row.generation.max(0) as u64,
        })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (subscription_id, kind, fire_at, generation)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscription_id, kind)
            DO UPDATE SET fire_at = EXCLUDED.fire_at, generation = EXCLUDED.generation
            "#,
        )
        .bind(task.subscription_id.as_uuid())
        .bind(task.kind.as_str())
        .bind(task.fire_at.as_datetime())
        .bind(task.generation as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to schedule task: {}", e)))?;
        Ok(())
    }

    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        sqlx::query(r#"DELETE FROM scheduled_tasks WHERE subscription_id = $1"#)
            .bind(subscription_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to cancel tasks: {}", e)))?;
        Ok(())
    }

    async fn due_tasks(&self, now: Timestamp) -> Result<Vec<ScheduledTask>, DomainError> {
        let rows = sqlx::query_as::<_, ScheduledTaskRow>(
            r#"
            SELECT * FROM scheduled_tasks
            WHERE fire_at <= $1
            ORDER BY fire_at ASC, subscription_id ASC
            "#,
        )
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to scan due tasks: {}", e)))?;

        rows.into_iter().map(ScheduledTask::try_from).collect()
    }

    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<ScheduledTask>, DomainError> {
        let row = sqlx::query_as::<_, ScheduledTaskRow>(
            r#"SELECT * FROM scheduled_tasks WHERE subscription_id = $1 AND kind = $2"#,
        )
        .bind(subscription_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to load task: {}", e)))?;

        row.map(ScheduledTask::try_from).transpose()
    }

    async fn complete(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
        generation: u64,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            DELETE FROM scheduled_tasks
            WHERE subscription_id = $1 AND kind = $2 AND generation = $3
            "#,
        )
        .bind(subscription_id.as_uuid())
        .bind(kind.as_str())
        .bind(generation as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to complete task: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_roundtrips_known_kind() {
        let row = ScheduledTaskRow {
            subscription_id: Uuid::new_v4(),
            kind: "retry_dunning".to_string(),
            fire_at: Utc::now(),
            generation: 4,
        };
        let task = ScheduledTask::try_from(row).unwrap();
        assert_eq!(task.kind, TaskKind::RetryDunning);
        assert_eq!(task.generation, 4);
    }

    #[test]
    fn row_conversion_rejects_unknown_kind() {
        let row = ScheduledTaskRow {
            subscription_id: Uuid::new_v4(),
            kind: "compact_segments".to_string(),
            fire_at: Utc::now(),
            generation: 1,
        };
        assert!(ScheduledTask::try_from(row).is_err());
    }
}
