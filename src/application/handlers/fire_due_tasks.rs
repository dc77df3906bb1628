//! FireDueTasksHandler - Command handler for the scheduler poll.
//!
//! Workers call this on their poll interval. Due tasks are converted into
//! ledger events with task-derived idempotency keys, so a crash between
//! firing and completion re-ingests as a duplicate instead of double
//! processing, and a fire on two workers at once collapses to one effect.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::foundation::{DomainError, IdempotencyKey};
use crate::domain::ledger::{EventKind, LedgerEvent};
use crate::domain::scheduler::{ScheduledTask, TaskKind};
use crate::ports::{Clock, SubscriptionStore, TaskStore};

use super::event_applier::EventApplier;

/// Counters from one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireSummary {
    /// Tasks whose event was applied (or deduplicated).
    pub fired: usize,

    /// Stale fires discarded by the generation check.
    pub discarded_stale: usize,

    /// Tasks left in place after a transient failure; retried next poll.
    pub failed: usize,
}

/// Handler that fires due scheduled tasks.
pub struct FireDueTasksHandler {
    applier: Arc<EventApplier>,
    store: Arc<dyn SubscriptionStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl FireDueTasksHandler {
    pub fn new(
        applier: Arc<EventApplier>,
        store: Arc<dyn SubscriptionStore>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            applier,
            store,
            tasks,
            clock,
            batch_size,
        }
    }

    /// Fire everything due at the current clock reading.
    pub async fn handle(&self) -> Result<FireSummary, DomainError> {
        let now = self.clock.now();
        let mut due = self.tasks.due_tasks(now).await?;
        due.truncate(self.batch_size);

        let mut summary = FireSummary::default();
        for task in due {
            match self.fire(&task).await {
                Ok(Fired::Applied) => summary.fired += 1,
                Ok(Fired::Stale) => summary.discarded_stale += 1,
                Err(err) => {
                    error!(
                        subscription_id = %task.subscription_id,
                        task_kind = %task.kind,
                        error = %err,
                        "Task fire failed; task stays due for the next poll"
                    );
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn fire(&self, task: &ScheduledTask) -> Result<Fired, DomainError> {
        let subscription = match self.store.find_by_id(&task.subscription_id).await? {
            Some(subscription) => subscription,
            None => {
                warn!(
                    subscription_id = %task.subscription_id,
                    task_kind = %task.kind,
                    "Task refers to an unknown subscription; dropping"
                );
                self.tasks
                    .complete(&task.subscription_id, task.kind, task.generation)
                    .await?;
                return Ok(Fired::Stale);
            }
        };

        // Superseded-task policy: a fire carrying an older generation
        // than the subscription's latest recorded one is discarded
        // silently. This is what prevents duplicate renewal attempts
        // after a reschedule.
        if task.generation < subscription.generation {
            debug!(
                subscription_id = %task.subscription_id,
                task_kind = %task.kind,
                task_generation = task.generation,
                current_generation = subscription.generation,
                "Discarding stale task fire"
            );
            self.tasks
                .complete(&task.subscription_id, task.kind, task.generation)
                .await?;
            return Ok(Fired::Stale);
        }

        let event_kind = match task.kind {
            TaskKind::AttemptRenewal | TaskKind::RetryDunning => EventKind::RenewalDue,
            TaskKind::ExpireGrace => EventKind::ExpireGrace,
        };
        // No cycle id here: the transition engine derives the billing
        // cycle from the subscription, and a crash-refire must produce a
        // byte-identical event so it lands as a ledger duplicate.
        let event = LedgerEvent::new(
            IdempotencyKey::for_task_fire(
                &task.subscription_id,
                task.kind.as_str(),
                task.generation,
            ),
            task.subscription_id,
            event_kind,
            None,
            serde_json::json!({
                "task_kind": task.kind.as_str(),
                "generation": task.generation,
                "fire_at": task.fire_at,
            }),
            self.clock.now(),
        );

        self.applier.apply(event).await?;
        self.tasks
            .complete(&task.subscription_id, task.kind, task.generation)
            .await?;
        Ok(Fired::Applied)
    }
}

enum Fired {
    Applied,
    Stale,
}
