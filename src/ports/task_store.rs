//! TaskStore port - durable scheduled task table.
//!
//! Scheduled work is a durable table keyed by (subscription id, kind),
//! mutated only through generation-checked replacement, never an
//! in-memory timer list, so multiple workers and restarts stay
//! consistent.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::domain::scheduler::{ScheduledTask, TaskKind};

/// Port for the scheduled task table.
///
/// Implementations must keep at most one task per (subscription, kind)
/// and must return due tasks in deterministic order: fire time ascending,
/// then subscription id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace the task of this kind for the subscription.
    ///
    /// Replacement is how supersession works: the caller bumps the
    /// subscription's generation first, so the previous task's fire - if
    /// already in flight - fails its generation check and is discarded.
    async fn schedule(&self, task: ScheduledTask) -> Result<(), DomainError>;

    /// Remove every outstanding task for the subscription.
    ///
    /// Advisory: a task already claimed by a poller still completes and
    /// is resolved by the stale-generation check.
    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError>;

    /// Tasks with `fire_at <= now`, ordered by (fire_at, subscription id).
    async fn due_tasks(&self, now: Timestamp) -> Result<Vec<ScheduledTask>, DomainError>;

    /// Fetch the outstanding task of a kind for a subscription, if any.
    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<ScheduledTask>, DomainError>;

    /// Remove the task if it still carries the given generation.
    ///
    /// A task superseded between fire and completion is left alone; the
    /// replacement owns the slot.
    async fn complete(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
        generation: u64,
    ) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn TaskStore) {}
    }
}
