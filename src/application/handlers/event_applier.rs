//! EventApplier - shared service that drives ledger events through the
//! state machine and carries out the resulting intents.
//!
//! Every path into the engine (external ingest, scheduler fires,
//! reconciliation) converges here, so the ordering guarantees live in one
//! place:
//!
//! 1. The event is recorded in the ledger before anything else happens.
//! 2. The transition is computed purely and persisted with a bounded
//!    compare-and-set loop; a version conflict re-reads and retries.
//! 3. Tasks are rescheduled under a freshly bumped generation.
//! 4. Charges are issued after the state write, outside any lock, with a
//!    durable `charge_requested` write-ahead entry and a call timeout.
//!    A timeout or transient failure leaves the entry unprocessed for
//!    reconciliation; it is never assumed to have succeeded or failed.
//! 5. The event is marked processed last, so a crash anywhere above
//!    leaves a resumable unprocessed entry instead of lost work.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::foundation::{
    CycleId, DomainError, ErrorCode, IdempotencyKey, SubscriptionId,
};
use crate::domain::ledger::{EventKind, LedgerEvent};
use crate::domain::scheduler::ScheduledTask;
use crate::domain::subscription::{
    apply_event, BillingPolicy, EffectIntent, Subscription, TransitionOutcome,
};
use crate::ports::{
    CasResult, ChargeOutcome, Clock, EventLedger, PaymentGateway, RecordOutcome, SubscriptionStore,
    TaskStore,
};

/// Bounded read-modify-write retries before a version conflict surfaces
/// as a transient failure to the caller.
const MAX_CAS_RETRIES: u32 = 5;

/// How an event landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event changed the subscription.
    Applied,

    /// The event was recorded and accepted but changed nothing
    /// (terminal state, settled cycle, or already-reflected request).
    NoOp,

    /// The event's idempotency key was already recorded and processed;
    /// nothing happened.
    Duplicate,

    /// The event kind is not valid for the current state. Recorded and
    /// logged, no mutation. Never fatal.
    InvalidTransition(String),
}

struct Step {
    outcome: ApplyOutcome,
    follow_ups: Vec<LedgerEvent>,
}

enum Source {
    /// Not yet in the ledger; record first.
    Fresh(LedgerEvent),
    /// Already in the ledger, unprocessed; drive it directly.
    Stored(LedgerEvent),
}

/// Shared applier service. Cheap to clone via `Arc` fields.
pub struct EventApplier {
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn EventLedger>,
    tasks: Arc<dyn TaskStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
    charge_timeout: Duration,
}

impl EventApplier {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn EventLedger>,
        tasks: Arc<dyn TaskStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
        charge_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            tasks,
            gateway,
            clock,
            policy,
            charge_timeout,
        }
    }

    /// The configured billing policy.
    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    /// Record and apply an event, then drain any follow-up outcome
    /// events produced by charges it triggered.
    pub async fn apply(&self, event: LedgerEvent) -> Result<ApplyOutcome, DomainError> {
        self.run(VecDeque::from([Source::Fresh(event)])).await
    }

    /// Re-drive an event that is already in the ledger but was never
    /// marked processed (crash recovery path used by reconciliation).
    pub async fn resume(&self, event: LedgerEvent) -> Result<ApplyOutcome, DomainError> {
        self.run(VecDeque::from([Source::Stored(event)])).await
    }

    /// Issue (or re-issue) the charge for a cycle and apply its outcome.
    ///
    /// Safe to call repeatedly: the write-ahead entry and the gateway
    /// call are both idempotent per cycle. Used by reconciliation when a
    /// status query shows the gateway never received the charge.
    pub async fn retry_charge(
        &self,
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
    ) -> Result<(), DomainError> {
        let subscription = self
            .store
            .find_by_id(&subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found")
                    .with_detail("subscription_id", subscription_id.to_string())
            })?;

        if subscription.open_cycle != Some(cycle_id) {
            debug!(
                subscription_id = %subscription_id,
                cycle_id = %cycle_id,
                "Skipping charge retry for a cycle that is no longer open"
            );
            return Ok(());
        }

        if let Some(outcome_event) = self
            .issue_charge(subscription_id, cycle_id, subscription.retry_count)
            .await?
        {
            self.apply(outcome_event).await?;
        }
        Ok(())
    }

    async fn run(&self, mut queue: VecDeque<Source>) -> Result<ApplyOutcome, DomainError> {
        let mut primary: Option<ApplyOutcome> = None;

        while let Some(item) = queue.pop_front() {
            let step = match item {
                Source::Fresh(event) => self.record_and_drive(event).await?,
                Source::Stored(event) => self.drive(event).await?,
            };
            if primary.is_none() {
                primary = Some(step.outcome);
            }
            queue.extend(step.follow_ups.into_iter().map(Source::Fresh));
        }

        Ok(primary.unwrap_or(ApplyOutcome::NoOp))
    }

    async fn record_and_drive(&self, event: LedgerEvent) -> Result<Step, DomainError> {
        match self.ledger.record(event).await? {
            RecordOutcome::Duplicate(existing) if existing.processed => {
                debug!(
                    idempotency_key = %existing.idempotency_key,
                    "Duplicate delivery of a processed event; no further effects"
                );
                Ok(Step {
                    outcome: ApplyOutcome::Duplicate,
                    follow_ups: Vec::new(),
                })
            }
            // An unprocessed duplicate means a previous attempt crashed
            // mid-application; pick up where it left off.
            RecordOutcome::Duplicate(existing) => self.drive(existing).await,
            RecordOutcome::Recorded(recorded) => self.drive(recorded).await,
        }
    }

    async fn drive(&self, event: LedgerEvent) -> Result<Step, DomainError> {
        if !event.kind.drives_state_machine() {
            // Audit records: a reconcile tick settles immediately, a
            // charge request is settled by its outcome event.
            if event.kind == EventKind::ReconcileTick {
                self.ledger.mark_processed(&event.idempotency_key).await?;
            }
            return Ok(Step {
                outcome: ApplyOutcome::NoOp,
                follow_ups: Vec::new(),
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;

            let subscription = self
                .store
                .find_by_id(&event.subscription_id)
                .await?
                .ok_or_else(|| {
                    DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found")
                        .with_detail("subscription_id", event.subscription_id.to_string())
                })?;

            let now = self.clock.now();
            let transition = match apply_event(&subscription, &event, &self.policy, now) {
                Ok(transition) => transition,
                Err(err) if err.code == ErrorCode::InvalidTransition => {
                    warn!(
                        subscription_id = %event.subscription_id,
                        event_kind = %event.kind,
                        status = ?subscription.status,
                        error = %err,
                        "Event not applicable to current state; recorded as no-op"
                    );
                    self.ledger.mark_processed(&event.idempotency_key).await?;
                    return Ok(Step {
                        outcome: ApplyOutcome::InvalidTransition(err.message),
                        follow_ups: Vec::new(),
                    });
                }
                Err(err) => return Err(err),
            };

            if !transition.is_applied() {
                debug!(
                    subscription_id = %event.subscription_id,
                    event_kind = %event.kind,
                    disposition = ?transition.disposition,
                    "Event accepted with no state change"
                );
                self.settle_charge_request(&event, subscription.retry_count)
                    .await?;
                self.ledger.mark_processed(&event.idempotency_key).await?;
                return Ok(Step {
                    outcome: ApplyOutcome::NoOp,
                    follow_ups: Vec::new(),
                });
            }

            match self.persist_and_execute(subscription, transition, &event).await? {
                Some(step) => return Ok(step),
                None => {
                    // Version conflict: another worker won; re-read and retry.
                    if attempts >= MAX_CAS_RETRIES {
                        return Err(DomainError::storage_conflict(format!(
                            "Gave up after {} optimistic retries",
                            attempts
                        ))
                        .with_detail("subscription_id", event.subscription_id.to_string()));
                    }
                }
            }
        }
    }

    /// One CAS attempt plus effect execution. Returns `None` on a version
    /// conflict so the caller can re-read and retry.
    async fn persist_and_execute(
        &self,
        read: Subscription,
        transition: TransitionOutcome,
        event: &LedgerEvent,
    ) -> Result<Option<Step>, DomainError> {
        let mut next = transition.subscription;

        // Plan task mutations under freshly bumped generations before the
        // state write, so the persisted subscription already records the
        // latest scheduling generation and superseded fires go stale.
        let mut cancel_tasks = false;
        let mut planned: Vec<ScheduledTask> = Vec::new();
        for intent in &transition.intents {
            match intent {
                EffectIntent::CancelTasks => {
                    cancel_tasks = true;
                    next.bump_generation();
                }
                EffectIntent::Schedule { kind, fire_at } => {
                    let generation = next.bump_generation();
                    planned.push(ScheduledTask::new(next.id, *kind, *fire_at, generation));
                }
                _ => {}
            }
        }

        match self.store.update_if_version(&next, read.version).await? {
            CasResult::VersionMismatch => return Ok(None),
            CasResult::Updated => {}
        }

        info!(
            subscription_id = %next.id,
            event_kind = %event.kind,
            from = ?read.status,
            to = ?next.status,
            retry_count = next.retry_count,
            "Transition applied"
        );

        if cancel_tasks {
            self.tasks.cancel_all(&next.id).await?;
        }
        for task in planned {
            self.tasks.schedule(task).await?;
        }

        self.settle_charge_request(event, read.retry_count).await?;

        // Charges go out after the state write, outside any lock.
        let mut follow_ups = Vec::new();
        for intent in &transition.intents {
            match intent {
                EffectIntent::Charge {
                    subscription_id,
                    cycle_id,
                } => {
                    if let Some(outcome_event) = self
                        .issue_charge(*subscription_id, *cycle_id, next.retry_count)
                        .await?
                    {
                        follow_ups.push(outcome_event);
                    }
                }
                EffectIntent::Notify { kind } => {
                    info!(
                        subscription_id = %next.id,
                        notification = ?kind,
                        "Notification intent emitted for external notifier"
                    );
                }
                _ => {}
            }
        }

        self.ledger.mark_processed(&event.idempotency_key).await?;

        Ok(Some(Step {
            outcome: ApplyOutcome::Applied,
            follow_ups,
        }))
    }

    /// A settled charge outcome resolves the write-ahead request entry
    /// for its attempt, whether the outcome applied or no-oped.
    ///
    /// The attempt comes from the outcome event when it carries one
    /// (direct-call and reconciled outcomes do); gateway callbacks fall
    /// back to the in-flight attempt read from the subscription.
    async fn settle_charge_request(
        &self,
        event: &LedgerEvent,
        in_flight_attempt: u32,
    ) -> Result<(), DomainError> {
        if matches!(
            event.kind,
            EventKind::ChargeSucceeded | EventKind::ChargeFailed
        ) {
            if let Some(cycle_id) = event.cycle_id {
                let attempt = event.attempt().unwrap_or(in_flight_attempt);
                self.ledger
                    .mark_processed(&IdempotencyKey::for_charge_request(&cycle_id, attempt))
                    .await?;
            }
        }
        Ok(())
    }

    /// Write-ahead, then charge, bounded by the configured timeout.
    ///
    /// Returns the outcome event to apply when the gateway settled the
    /// charge synchronously. A pending, timed-out, or transiently failed
    /// call returns `None` and leaves the `charge_requested` entry
    /// unprocessed for reconciliation to resolve by idempotent re-query.
    async fn issue_charge(
        &self,
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
        attempt: u32,
    ) -> Result<Option<LedgerEvent>, DomainError> {
        let now = self.clock.now();
        let request = LedgerEvent::charge_requested(subscription_id, cycle_id, attempt, now);
        // A refire of the same attempt records the same key; duplicate is
        // expected.
        self.ledger.record(request).await?;

        let call = self.gateway.charge(&subscription_id, &cycle_id);
        let result = tokio::time::timeout(self.charge_timeout, call).await;

        let outcome = match result {
            Err(_elapsed) => {
                warn!(
                    subscription_id = %subscription_id,
                    cycle_id = %cycle_id,
                    timeout_secs = self.charge_timeout.as_secs(),
                    "Charge call timed out; outcome ambiguous until reconciled"
                );
                return Ok(None);
            }
            Ok(Err(err)) => {
                warn!(
                    subscription_id = %subscription_id,
                    cycle_id = %cycle_id,
                    error = %err,
                    retryable = err.retryable,
                    "Charge call failed; outcome left for reconciliation"
                );
                return Ok(None);
            }
            Ok(Ok(outcome)) => outcome,
        };

        let received_at = self.clock.now();
        match outcome {
            ChargeOutcome::Succeeded => Ok(Some(LedgerEvent::charge_outcome(
                subscription_id,
                cycle_id,
                attempt,
                EventKind::ChargeSucceeded,
                None,
                received_at,
            ))),
            ChargeOutcome::Failed { reason } => Ok(Some(LedgerEvent::charge_outcome(
                subscription_id,
                cycle_id,
                attempt,
                EventKind::ChargeFailed,
                Some(reason),
                received_at,
            ))),
            ChargeOutcome::Pending => {
                debug!(
                    subscription_id = %subscription_id,
                    cycle_id = %cycle_id,
                    "Gateway reports charge pending; reconciliation will re-query"
                );
                Ok(None)
            }
        }
    }
}
