//! In-memory implementation of TaskStore.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::domain::scheduler::{ScheduledTask, TaskKind};
use crate::ports::TaskStore;

/// In-memory task table keyed by (subscription id, kind).
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<(SubscriptionId, TaskKind), ScheduledTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding tasks, for test assertions.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// True when no tasks are outstanding.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), DomainError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert((task.subscription_id, task.kind), task);
        Ok(())
    }

    async fn cancel_all(&self, subscription_id: &SubscriptionId) -> Result<(), DomainError> {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|(sub, _), _| sub != subscription_id);
        Ok(())
    }

    async fn due_tasks(&self, now: Timestamp) -> Result<Vec<ScheduledTask>, DomainError> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<ScheduledTask> = tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.due_order(b));
        Ok(due)
    }

    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
    ) -> Result<Option<ScheduledTask>, DomainError> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&(*subscription_id, kind))
            .cloned())
    }

    async fn complete(
        &self,
        subscription_id: &SubscriptionId,
        kind: TaskKind,
        generation: u64,
    ) -> Result<(), DomainError> {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get(&(*subscription_id, kind)) {
            if task.generation == generation {
                tasks.remove(&(*subscription_id, kind));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_unix_secs(secs)
    }

    fn task(
        subscription_id: SubscriptionId,
        kind: TaskKind,
        fire_at: Timestamp,
        generation: u64,
    ) -> ScheduledTask {
        ScheduledTask::new(subscription_id, kind, fire_at, generation)
    }

    #[tokio::test]
    async fn schedule_replaces_existing_task_of_same_kind() {
        let store = InMemoryTaskStore::new();
        let sub = SubscriptionId::new();

        store
            .schedule(task(sub, TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();
        store
            .schedule(task(sub, TaskKind::AttemptRenewal, t(200), 2))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store.get(&sub, TaskKind::AttemptRenewal).await.unwrap().unwrap();
        assert_eq!(stored.fire_at, t(200));
        assert_eq!(stored.generation, 2);
    }

    #[tokio::test]
    async fn different_kinds_occupy_separate_slots() {
        let store = InMemoryTaskStore::new();
        let sub = SubscriptionId::new();

        store
            .schedule(task(sub, TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();
        store
            .schedule(task(sub, TaskKind::ExpireGrace, t(200), 2))
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn cancel_all_clears_only_that_subscription() {
        let store = InMemoryTaskStore::new();
        let sub_a = SubscriptionId::new();
        let sub_b = SubscriptionId::new();

        store
            .schedule(task(sub_a, TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();
        store
            .schedule(task(sub_b, TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();

        store.cancel_all(&sub_a).await.unwrap();

        assert!(store.get(&sub_a, TaskKind::AttemptRenewal).await.unwrap().is_none());
        assert!(store.get(&sub_b, TaskKind::AttemptRenewal).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn due_tasks_returns_only_due_in_deterministic_order() {
        let store = InMemoryTaskStore::new();
        let mut subs: Vec<SubscriptionId> = (0..3).map(|_| SubscriptionId::new()).collect();
        subs.sort();

        // Same fire time for the first two: order falls back to
        // subscription id.
        store
            .schedule(task(subs[1], TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();
        store
            .schedule(task(subs[0], TaskKind::AttemptRenewal, t(100), 1))
            .await
            .unwrap();
        store
            .schedule(task(subs[2], TaskKind::AttemptRenewal, t(50), 1))
            .await
            .unwrap();

        let due = store.due_tasks(t(100)).await.unwrap();
        let order: Vec<SubscriptionId> = due.iter().map(|t| t.subscription_id).collect();
        assert_eq!(order, vec![subs[2], subs[0], subs[1]]);

        let due = store.due_tasks(t(60)).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn complete_removes_only_matching_generation() {
        let store = InMemoryTaskStore::new();
        let sub = SubscriptionId::new();

        store
            .schedule(task(sub, TaskKind::RetryDunning, t(100), 3))
            .await
            .unwrap();

        // Older generation: the slot now belongs to the replacement.
        store.complete(&sub, TaskKind::RetryDunning, 2).await.unwrap();
        assert!(store.get(&sub, TaskKind::RetryDunning).await.unwrap().is_some());

        store.complete(&sub, TaskKind::RetryDunning, 3).await.unwrap();
        assert!(store.get(&sub, TaskKind::RetryDunning).await.unwrap().is_none());
    }
}
