//! CreateSubscriptionHandler - Command handler for starting a new
//! subscription lifecycle.

use std::sync::Arc;

use tracing::info;

use crate::domain::foundation::{DomainError, SubscriptionId};
use crate::domain::scheduler::{ScheduledTask, TaskKind};
use crate::domain::subscription::{BillingPolicy, Subscription};
use crate::ports::{Clock, SubscriptionStore, TaskStore};

/// Command to create a subscription.
#[derive(Debug, Clone, Default)]
pub struct CreateSubscriptionCommand {
    /// Caller-assigned id, or `None` to generate one.
    pub subscription_id: Option<SubscriptionId>,

    /// Start with the configured trial when one is configured.
    pub with_trial: bool,
}

/// Handler for creating subscriptions.
///
/// Creates the aggregate, persists it, and schedules the first renewal
/// task at its initial due time (period end, or trial end when trialing).
pub struct CreateSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl CreateSubscriptionHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            store,
            tasks,
            clock,
            policy,
        }
    }

    pub async fn handle(
        &self,
        cmd: CreateSubscriptionCommand,
    ) -> Result<Subscription, DomainError> {
        let id = cmd.subscription_id.unwrap_or_default();
        let now = self.clock.now();

        let mut subscription = match (cmd.with_trial, self.policy.trial_days) {
            (true, Some(trial_days)) => {
                Subscription::create_with_trial(id, self.policy.period_days, trial_days, now)
            }
            _ => Subscription::create(id, self.policy.period_days, now),
        };

        let generation = subscription.bump_generation();
        let fire_at = subscription
            .next_due
            .ok_or_else(|| DomainError::storage("New subscription has no due time"))?;

        self.store.insert(&subscription).await?;
        self.tasks
            .schedule(ScheduledTask::new(
                subscription.id,
                TaskKind::AttemptRenewal,
                fire_at,
                generation,
            ))
            .await?;

        info!(
            subscription_id = %subscription.id,
            status = ?subscription.status,
            next_due = %fire_at,
            "Subscription created"
        );

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemorySubscriptionStore, InMemoryTaskStore, ManualClock};
    use crate::domain::foundation::Timestamp;
    use crate::domain::subscription::SubscriptionStatus;

    fn handler(
        policy: BillingPolicy,
    ) -> (
        CreateSubscriptionHandler,
        Arc<InMemorySubscriptionStore>,
        Arc<InMemoryTaskStore>,
    ) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_unix_secs(1_700_000_000)));
        let handler =
            CreateSubscriptionHandler::new(store.clone(), tasks.clone(), clock, policy);
        (handler, store, tasks)
    }

    #[tokio::test]
    async fn create_persists_and_schedules_first_renewal() {
        let (handler, store, tasks) = handler(BillingPolicy::default());

        let created = handler
            .handle(CreateSubscriptionCommand::default())
            .await
            .unwrap();

        assert_eq!(created.status, SubscriptionStatus::Active);

        let stored = store.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.id, created.id);

        let task = tasks
            .get(&created.id, TaskKind::AttemptRenewal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.fire_at, created.next_due.unwrap());
        assert_eq!(task.generation, created.generation);
    }

    #[tokio::test]
    async fn create_with_trial_starts_trialing() {
        let policy = BillingPolicy {
            trial_days: Some(14),
            ..Default::default()
        };
        let (handler, _, _) = handler(policy);

        let created = handler
            .handle(CreateSubscriptionCommand {
                subscription_id: None,
                with_trial: true,
            })
            .await
            .unwrap();

        assert_eq!(created.status, SubscriptionStatus::Trialing);
        assert_eq!(
            created.next_due,
            Some(created.created_at.add_days(14))
        );
    }

    #[tokio::test]
    async fn trial_request_without_configured_trial_starts_active() {
        let (handler, _, _) = handler(BillingPolicy::default());

        let created = handler
            .handle(CreateSubscriptionCommand {
                subscription_id: None,
                with_trial: true,
            })
            .await
            .unwrap();

        assert_eq!(created.status, SubscriptionStatus::Active);
    }
}
