//! ReconcileHandler - the periodic safety net.
//!
//! Runs on a fixed cadence, independent of per-subscription scheduling,
//! and heals the divergence left by lost callbacks and crash windows:
//!
//! - An unprocessed `charge_requested` entry older than the ambiguity
//!   window means a charge was issued but its outcome never landed. The
//!   gateway is re-queried idempotently (never a blind re-charge) and the
//!   authoritative outcome is driven back through the ledger.
//! - Other unprocessed events older than the staleness threshold are
//!   re-driven through the applier (crash between record and apply).
//! - Subscriptions whose `next_due` has passed without an outstanding
//!   task lost their schedule in a crash window; the task is re-issued
//!   under the current generation.
//!
//! Nothing here leaves a subscription indefinitely ambiguous: an entry
//! that stays unresolved is retried on every sweep, and the sweep itself
//! is the scheduled recheck.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;
use crate::domain::foundation::{DomainError, IdempotencyKey, Timestamp};
use crate::domain::ledger::{EventKind, LedgerEvent};
use crate::domain::scheduler::{ScheduledTask, TaskKind};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{ChargeOutcome, Clock, EventLedger, GatewayErrorCode, PaymentGateway, SubscriptionStore, TaskStore};

use super::event_applier::EventApplier;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Stale unprocessed entries examined.
    pub scanned: usize,

    /// Ambiguous charges resolved to a definite outcome.
    pub resolved: usize,

    /// Ambiguous charges still pending after the bounded queries; they
    /// stay queued for the next sweep.
    pub still_ambiguous: usize,

    /// Stuck non-charge events re-driven through the applier.
    pub resumed: usize,

    /// Lost scheduled tasks re-issued.
    pub healed_tasks: usize,
}

/// The reconciliation driver.
pub struct ReconcileHandler {
    applier: Arc<EventApplier>,
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn EventLedger>,
    tasks: Arc<dyn TaskStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
}

impl ReconcileHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        applier: Arc<EventApplier>,
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn EventLedger>,
        tasks: Arc<dyn TaskStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            applier,
            store,
            ledger,
            tasks,
            gateway,
            clock,
            config,
        }
    }

    /// Run one sweep.
    pub async fn handle(&self) -> Result<ReconcileSummary, DomainError> {
        let now = self.clock.now();
        let stale_cutoff = now.minus_secs(self.config.staleness_threshold_secs);
        let ambiguity_cutoff = now.minus_secs(self.config.charge_ambiguity_secs);

        let mut summary = ReconcileSummary::default();

        let mut stream = self
            .ledger
            .unprocessed_since(Timestamp::from_unix_secs(0))
            .await?;

        while let Some(event) = stream.next().await {
            let event = event?;
            match event.kind {
                EventKind::ChargeRequested => {
                    if event.received_at > ambiguity_cutoff {
                        continue;
                    }
                    summary.scanned += 1;
                    self.record_tick(&event, now).await?;
                    match self.resolve_ambiguous_charge(&event, now).await? {
                        Resolution::Settled => summary.resolved += 1,
                        Resolution::StillAmbiguous => summary.still_ambiguous += 1,
                    }
                }
                EventKind::ReconcileTick => {
                    // Leftover audit entry from a crashed sweep.
                    self.ledger.mark_processed(&event.idempotency_key).await?;
                }
                _ => {
                    if event.received_at > stale_cutoff {
                        continue;
                    }
                    summary.scanned += 1;
                    debug!(
                        idempotency_key = %event.idempotency_key,
                        event_kind = %event.kind,
                        "Re-driving stuck unprocessed event"
                    );
                    self.applier.resume(event).await?;
                    summary.resumed += 1;
                }
            }
        }

        summary.healed_tasks = self.heal_lost_tasks(stale_cutoff).await?;

        info!(
            scanned = summary.scanned,
            resolved = summary.resolved,
            still_ambiguous = summary.still_ambiguous,
            resumed = summary.resumed,
            healed_tasks = summary.healed_tasks,
            "Reconciliation sweep complete"
        );
        Ok(summary)
    }

    /// Audit record of reconciliation touching a subscription.
    async fn record_tick(&self, event: &LedgerEvent, now: Timestamp) -> Result<(), DomainError> {
        let tick = LedgerEvent::new(
            IdempotencyKey::for_reconcile_tick(&event.subscription_id, now.as_unix_secs()),
            event.subscription_id,
            EventKind::ReconcileTick,
            event.cycle_id,
            serde_json::json!({ "trigger": event.idempotency_key.as_str() }),
            now,
        );
        self.ledger.record(tick).await?;
        self.ledger
            .mark_processed(&IdempotencyKey::for_reconcile_tick(
                &event.subscription_id,
                now.as_unix_secs(),
            ))
            .await?;
        Ok(())
    }

    /// Re-query the gateway for the authoritative status of an ambiguous
    /// charge, bounded per sweep, and drive the outcome into the ledger.
    async fn resolve_ambiguous_charge(
        &self,
        request: &LedgerEvent,
        now: Timestamp,
    ) -> Result<Resolution, DomainError> {
        let cycle_id = match request.cycle_id {
            Some(cycle_id) => cycle_id,
            None => {
                warn!(
                    idempotency_key = %request.idempotency_key,
                    "Charge request entry has no cycle id; marking processed"
                );
                self.ledger.mark_processed(&request.idempotency_key).await?;
                return Ok(Resolution::Settled);
            }
        };

        let charge_attempt = request.attempt().unwrap_or(0);

        for query in 0..self.config.max_status_queries {
            match self.gateway.query_status(&cycle_id).await {
                Ok(ChargeOutcome::Succeeded) => {
                    let outcome = LedgerEvent::reconciled_outcome(
                        request.subscription_id,
                        cycle_id,
                        charge_attempt,
                        EventKind::ChargeSucceeded,
                        now,
                    );
                    self.applier.apply(outcome).await?;
                    self.ledger.mark_processed(&request.idempotency_key).await?;
                    return Ok(Resolution::Settled);
                }
                Ok(ChargeOutcome::Failed { .. }) => {
                    let outcome = LedgerEvent::reconciled_outcome(
                        request.subscription_id,
                        cycle_id,
                        charge_attempt,
                        EventKind::ChargeFailed,
                        now,
                    );
                    self.applier.apply(outcome).await?;
                    self.ledger.mark_processed(&request.idempotency_key).await?;
                    return Ok(Resolution::Settled);
                }
                Ok(ChargeOutcome::Pending) => {
                    debug!(
                        cycle_id = %cycle_id,
                        "Charge still pending at the gateway; recheck next sweep"
                    );
                    return Ok(Resolution::StillAmbiguous);
                }
                Err(err) if err.code == GatewayErrorCode::NotFound => {
                    // The charge never reached the gateway; re-issuing it
                    // is an informed retry, not a blind re-charge. This
                    // request entry is authoritatively dead either way.
                    info!(
                        subscription_id = %request.subscription_id,
                        cycle_id = %cycle_id,
                        "Gateway has no record of the charge; re-issuing"
                    );
                    self.ledger.mark_processed(&request.idempotency_key).await?;
                    self.applier
                        .retry_charge(request.subscription_id, cycle_id)
                        .await?;
                    return Ok(Resolution::Settled);
                }
                Err(err) if err.retryable => {
                    debug!(
                        cycle_id = %cycle_id,
                        query = query + 1,
                        error = %err,
                        "Status query transiently failed; retrying within budget"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        cycle_id = %cycle_id,
                        error = %err,
                        "Status query failed; recheck next sweep"
                    );
                    return Ok(Resolution::StillAmbiguous);
                }
            }
        }

        Ok(Resolution::StillAmbiguous)
    }

    /// Re-issue scheduled tasks lost between the state write and the task
    /// write.
    async fn heal_lost_tasks(&self, cutoff: Timestamp) -> Result<usize, DomainError> {
        let mut healed = 0;
        for subscription in self.store.find_next_due_before(cutoff).await? {
            if let Some(kind) = self.expected_task_kind(&subscription).await? {
                let fire_at = match subscription.next_due {
                    Some(fire_at) => fire_at,
                    None => continue,
                };
                if self.tasks.get(&subscription.id, kind).await?.is_some() {
                    continue;
                }
                info!(
                    subscription_id = %subscription.id,
                    task_kind = %kind,
                    fire_at = %fire_at,
                    "Re-issuing scheduled task lost in a crash window"
                );
                self.tasks
                    .schedule(ScheduledTask::new(
                        subscription.id,
                        kind,
                        fire_at,
                        subscription.generation,
                    ))
                    .await?;
                healed += 1;
            }
        }
        Ok(healed)
    }

    /// The task kind that should be outstanding for a due subscription,
    /// or `None` when another reconciliation path owns it.
    async fn expected_task_kind(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<TaskKind>, DomainError> {
        if let Some(cycle_id) = subscription.open_cycle {
            // A charge outcome is pending. If the write-ahead entry
            // exists the ambiguity path resolves it; if it is missing the
            // charge was never issued, so issue it now.
            let request_key =
                IdempotencyKey::for_charge_request(&cycle_id, subscription.retry_count);
            match self.ledger.find_by_key(&request_key).await? {
                None => {
                    info!(
                        subscription_id = %subscription.id,
                        cycle_id = %cycle_id,
                        "Open cycle with no charge request on record; issuing charge"
                    );
                    self.applier
                        .retry_charge(subscription.id, cycle_id)
                        .await?;
                }
                Some(request) if request.processed => {
                    warn!(
                        subscription_id = %subscription.id,
                        cycle_id = %cycle_id,
                        "Open cycle but its charge request is settled; awaiting callback"
                    );
                }
                Some(_) => {}
            }
            return Ok(None);
        }

        Ok(match subscription.status {
            SubscriptionStatus::Trialing | SubscriptionStatus::Active => {
                Some(TaskKind::AttemptRenewal)
            }
            SubscriptionStatus::PastDue => Some(TaskKind::RetryDunning),
            SubscriptionStatus::GracePeriod => Some(TaskKind::ExpireGrace),
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired => None,
        })
    }
}

enum Resolution {
    Settled,
    StillAmbiguous,
}
