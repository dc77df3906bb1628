//! Integration tests for the subscription lifecycle engine.
//!
//! These tests drive the full loop end-to-end:
//! 1. CreateSubscriptionHandler persists the aggregate and queues the
//!    first renewal task
//! 2. FireDueTasksHandler polls due tasks and feeds them through the
//!    ledger into the state machine
//! 3. Gateway outcomes (direct, callback, or reconciled) settle billing
//!    cycles and schedule follow-up work
//! 4. ReconcileHandler heals ambiguous charges and crash windows
//!
//! Uses the in-memory adapters, the scripted gateway, and a manually
//! advanced clock so every time-based behavior is deterministic.

use std::sync::Arc;
use std::time::Duration;

use subscription_engine::adapters::gateway::MockPaymentGateway;
use subscription_engine::adapters::memory::{
    InMemoryEventLedger, InMemorySubscriptionStore, InMemoryTaskStore, ManualClock,
};
use subscription_engine::application::{
    CreateSubscriptionCommand, CreateSubscriptionHandler, EventApplier, FireDueTasksHandler,
    IngestEventHandler, IngestOutcome, ReconcileHandler,
};
use subscription_engine::config::ReconciliationConfig;
use subscription_engine::domain::foundation::{
    CycleId, IdempotencyKey, SubscriptionId, Timestamp,
};
use subscription_engine::domain::ledger::{EventKind, LedgerEvent};
use subscription_engine::domain::scheduler::TaskKind;
use subscription_engine::domain::subscription::{BillingPolicy, Subscription, SubscriptionStatus};
use subscription_engine::ports::{Clock, EventLedger, SubscriptionStore, TaskStore};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    store: Arc<InMemorySubscriptionStore>,
    ledger: Arc<InMemoryEventLedger>,
    tasks: Arc<InMemoryTaskStore>,
    gateway: Arc<MockPaymentGateway>,
    clock: Arc<ManualClock>,
    create: CreateSubscriptionHandler,
    ingest: IngestEventHandler,
    fire: FireDueTasksHandler,
    reconcile: ReconcileHandler,
}

fn t0() -> Timestamp {
    Timestamp::from_unix_secs(1_700_000_000)
}

fn policy() -> BillingPolicy {
    BillingPolicy {
        period_days: 30,
        max_retries: 2,
        backoff_base_secs: 3600,
        backoff_cap_secs: 86_400,
        grace_days: 7,
        trial_days: None,
        cancellation: Default::default(),
    }
}

fn harness_with(policy: BillingPolicy, gateway: MockPaymentGateway) -> Harness {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let ledger = Arc::new(InMemoryEventLedger::new());
    let tasks = Arc::new(InMemoryTaskStore::new());
    let gateway = Arc::new(gateway);
    let clock = Arc::new(ManualClock::new(t0()));

    let applier = Arc::new(EventApplier::new(
        store.clone(),
        ledger.clone(),
        tasks.clone(),
        gateway.clone(),
        clock.clone(),
        policy.clone(),
        Duration::from_secs(5),
    ));

    let create =
        CreateSubscriptionHandler::new(store.clone(), tasks.clone(), clock.clone(), policy);
    let ingest = IngestEventHandler::new(applier.clone());
    let fire = FireDueTasksHandler::new(
        applier.clone(),
        store.clone(),
        tasks.clone(),
        clock.clone(),
        100,
    );
    let reconcile = ReconcileHandler::new(
        applier,
        store.clone(),
        ledger.clone(),
        tasks.clone(),
        gateway.clone(),
        clock.clone(),
        ReconciliationConfig {
            cadence_secs: 300,
            staleness_threshold_secs: 600,
            charge_ambiguity_secs: 300,
            max_status_queries: 3,
        },
    );

    Harness {
        store,
        ledger,
        tasks,
        gateway,
        clock,
        create,
        ingest,
        fire,
        reconcile,
    }
}

fn harness(gateway: MockPaymentGateway) -> Harness {
    harness_with(policy(), gateway)
}

impl Harness {
    async fn create_subscription(&self) -> Subscription {
        self.create
            .handle(CreateSubscriptionCommand::default())
            .await
            .unwrap()
    }

    async fn subscription(&self, id: &SubscriptionId) -> Subscription {
        self.store.find_by_id(id).await.unwrap().unwrap()
    }

    fn callback(
        &self,
        key: &str,
        subscription_id: SubscriptionId,
        kind: EventKind,
        cycle_id: Option<CycleId>,
    ) -> LedgerEvent {
        LedgerEvent::new(
            IdempotencyKey::new(key).unwrap(),
            subscription_id,
            kind,
            cycle_id,
            serde_json::json!({ "source": "gateway_callback" }),
            self.clock.now(),
        )
    }
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn renewal_succeeds_and_rolls_across_two_periods() {
    let h = harness(MockPaymentGateway::succeeding());
    let sub = h.create_subscription().await;

    // First renewal.
    h.clock.advance_days(30);
    let summary = h.fire.handle().await.unwrap();
    assert_eq!(summary.fired, 1);

    let after_first = h.subscription(&sub.id).await;
    assert_eq!(after_first.status, SubscriptionStatus::Active);
    assert_eq!(after_first.current_period_start, t0().add_days(30));
    assert_eq!(after_first.current_period_end, t0().add_days(60));
    assert_eq!(after_first.next_due, Some(t0().add_days(60)));
    assert_eq!(after_first.retry_count, 0);
    assert!(after_first.open_cycle.is_none());

    // Second renewal: timing anchors to period boundaries, not the poll.
    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();

    let after_second = h.subscription(&sub.id).await;
    assert_eq!(after_second.current_period_end, t0().add_days(90));
    assert_eq!(h.gateway.charge_calls(), 2);
}

#[tokio::test]
async fn trial_converts_to_active_on_first_charge() {
    let trial_policy = BillingPolicy {
        trial_days: Some(14),
        ..policy()
    };
    let h = harness_with(trial_policy, MockPaymentGateway::succeeding());

    let sub = h
        .create
        .handle(CreateSubscriptionCommand {
            subscription_id: None,
            with_trial: true,
        })
        .await
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Trialing);

    h.clock.advance_days(14);
    h.fire.handle().await.unwrap();

    let converted = h.subscription(&sub.id).await;
    assert_eq!(converted.status, SubscriptionStatus::Active);
    // Paid period starts where the trial ended.
    assert_eq!(converted.current_period_start, t0().add_days(14));
    assert_eq!(converted.current_period_end, t0().add_days(44));
}

// =============================================================================
// Duplicate Delivery (spec scenario: charge_failed delivered twice)
// =============================================================================

#[tokio::test]
async fn duplicate_charge_failed_increments_retry_count_exactly_once() {
    // Gateway reports pending on the direct call, so the outcome arrives
    // only through callbacks.
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();

    let in_flight = h.subscription(&sub.id).await;
    let cycle = in_flight.open_cycle.expect("charge should be in flight");

    // Same idempotency key, identical payload, delivered twice.
    let first = h
        .ingest
        .handle(h.callback("evt_fail", sub.id, EventKind::ChargeFailed, Some(cycle)))
        .await
        .unwrap();
    let second = h
        .ingest
        .handle(h.callback("evt_fail", sub.id, EventKind::ChargeFailed, Some(cycle)))
        .await
        .unwrap();

    assert_eq!(first, IngestOutcome::Accepted);
    assert_eq!(second, IngestOutcome::Duplicate);

    let after = h.subscription(&sub.id).await;
    assert_eq!(after.status, SubscriptionStatus::PastDue);
    assert_eq!(after.retry_count, 1);
}

// =============================================================================
// Dunning Escalation (spec scenario: failure at max retries)
// =============================================================================

#[tokio::test]
async fn exhausted_dunning_escalates_to_grace_period_with_expiry_scheduled() {
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();
    let cycle = h.subscription(&sub.id).await.open_cycle.unwrap();

    // max_retries = 2: two failures stay in dunning, the third escalates.
    h.ingest
        .handle(h.callback("evt_f1", sub.id, EventKind::ChargeFailed, Some(cycle)))
        .await
        .unwrap();
    assert_eq!(h.subscription(&sub.id).await.retry_count, 1);

    h.ingest
        .handle(h.callback("evt_f2", sub.id, EventKind::ChargeFailed, Some(cycle)))
        .await
        .unwrap();
    let at_max = h.subscription(&sub.id).await;
    assert_eq!(at_max.status, SubscriptionStatus::PastDue);
    assert_eq!(at_max.retry_count, 2);

    let escalation_time = h.clock.now();
    h.ingest
        .handle(h.callback("evt_f3", sub.id, EventKind::ChargeFailed, Some(cycle)))
        .await
        .unwrap();

    let in_grace = h.subscription(&sub.id).await;
    assert_eq!(in_grace.status, SubscriptionStatus::GracePeriod);
    // Retry count was never pushed past the maximum.
    assert_eq!(in_grace.retry_count, 2);

    let expiry = h
        .tasks
        .get(&sub.id, TaskKind::ExpireGrace)
        .await
        .unwrap()
        .expect("grace expiry should be scheduled");
    assert_eq!(expiry.fire_at, escalation_time.add_days(7));
}

#[tokio::test]
async fn grace_period_expires_without_intervening_success() {
    let h = harness(MockPaymentGateway::failing("card_declined"));
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    // Each poll issues the charge directly and applies the failure; the
    // dunning retries themselves are scheduled tasks.
    h.fire.handle().await.unwrap();
    for _ in 0..2 {
        let due = h.subscription(&sub.id).await.next_due.unwrap();
        h.clock.set(due);
        h.fire.handle().await.unwrap();
    }

    let in_grace = h.subscription(&sub.id).await;
    assert_eq!(in_grace.status, SubscriptionStatus::GracePeriod);

    h.clock.set(in_grace.next_due.unwrap());
    h.fire.handle().await.unwrap();

    let expired = h.subscription(&sub.id).await;
    assert_eq!(expired.status, SubscriptionStatus::Expired);
    assert!(expired.next_due.is_none());
    assert!(h.tasks.is_empty().await);
}

// =============================================================================
// Grace Recovery (spec scenario: success before expiry, stale fire later)
// =============================================================================

#[tokio::test]
async fn grace_recovery_rolls_period_and_discards_stale_expiry_fire() {
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();
    let cycle = h.subscription(&sub.id).await.open_cycle.unwrap();

    for key in ["evt_f1", "evt_f2", "evt_f3"] {
        h.ingest
            .handle(h.callback(key, sub.id, EventKind::ChargeFailed, Some(cycle)))
            .await
            .unwrap();
    }
    let in_grace = h.subscription(&sub.id).await;
    assert_eq!(in_grace.status, SubscriptionStatus::GracePeriod);
    let stale_expiry = h
        .tasks
        .get(&sub.id, TaskKind::ExpireGrace)
        .await
        .unwrap()
        .unwrap();

    // Payment recovers before the expiry fires.
    h.clock.advance_days(2);
    h.ingest
        .handle(h.callback("evt_ok", sub.id, EventKind::ChargeSucceeded, Some(cycle)))
        .await
        .unwrap();

    let recovered = h.subscription(&sub.id).await;
    assert_eq!(recovered.status, SubscriptionStatus::Active);
    assert_eq!(recovered.retry_count, 0);
    assert_eq!(recovered.current_period_start, t0().add_days(30));

    // The old expiry task fires late (it was already claimed when the
    // recovery canceled it); its generation is stale so it is discarded.
    h.tasks.schedule(stale_expiry.clone()).await.unwrap();
    h.clock.set(stale_expiry.fire_at);
    let summary = h.fire.handle().await.unwrap();

    assert_eq!(summary.discarded_stale, 1);
    assert_eq!(
        h.subscription(&sub.id).await.status,
        SubscriptionStatus::Active
    );
}

// =============================================================================
// Cancellation (spec scenario: cancel while charge in flight)
// =============================================================================

#[tokio::test]
async fn cancel_during_in_flight_charge_is_immediate_and_late_outcome_noops() {
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();
    let cycle = h.subscription(&sub.id).await.open_cycle.unwrap();
    assert_eq!(h.gateway.charge_calls(), 1);

    let outcome = h
        .ingest
        .handle(h.callback("evt_cancel", sub.id, EventKind::CancelRequested, None))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Accepted);

    let canceled = h.subscription(&sub.id).await;
    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    assert!(canceled.next_due.is_none());
    assert!(h.tasks.is_empty().await);

    // The in-flight charge's eventual outcome is accepted and recorded
    // but produces no further state change.
    let late = h
        .ingest
        .handle(h.callback("evt_late", sub.id, EventKind::ChargeSucceeded, Some(cycle)))
        .await
        .unwrap();
    assert_eq!(late, IngestOutcome::Accepted);
    assert_eq!(
        h.subscription(&sub.id).await.status,
        SubscriptionStatus::Canceled
    );
}

#[tokio::test]
async fn no_charge_intent_after_terminal_state() {
    let h = harness(MockPaymentGateway::succeeding());
    let sub = h.create_subscription().await;

    h.ingest
        .handle(h.callback("evt_cancel", sub.id, EventKind::CancelRequested, None))
        .await
        .unwrap();
    assert_eq!(h.gateway.charge_calls(), 0);

    // Months of polls and sweeps after cancellation never charge again.
    for _ in 0..6 {
        h.clock.advance_days(30);
        h.fire.handle().await.unwrap();
        h.reconcile.handle().await.unwrap();
    }
    assert_eq!(h.gateway.charge_calls(), 0);
}

// =============================================================================
// Reconciliation (ambiguous outcomes and crash windows)
// =============================================================================

#[tokio::test]
async fn ambiguous_charge_resolves_by_query_without_double_charging() {
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();
    assert_eq!(h.gateway.charge_calls(), 1);

    // Nothing settles within the ambiguity window.
    h.clock.advance_secs(100);
    let early = h.reconcile.handle().await.unwrap();
    assert_eq!(early.resolved, 0);

    // The gateway eventually settled the charge; only a status query
    // observes it, no second charge is issued.
    h.gateway.set_query_succeeds();
    h.clock.advance_secs(600);
    let sweep = h.reconcile.handle().await.unwrap();
    assert_eq!(sweep.resolved, 1);

    let settled = h.subscription(&sub.id).await;
    assert_eq!(settled.status, SubscriptionStatus::Active);
    assert!(settled.open_cycle.is_none());
    assert_eq!(settled.current_period_end, t0().add_days(60));
    assert_eq!(h.gateway.charge_calls(), 1);
}

#[tokio::test]
async fn repeated_sweeps_keep_rechecking_until_the_gateway_settles() {
    let h = harness(MockPaymentGateway::pending());
    let sub = h.create_subscription().await;

    h.clock.advance_days(30);
    h.fire.handle().await.unwrap();

    // Sweep while still pending: recheck stays queued, never resolved by
    // assumption.
    for _ in 0..3 {
        h.clock.advance_secs(600);
        let sweep = h.reconcile.handle().await.unwrap();
        assert_eq!(sweep.still_ambiguous, 1);
        assert_eq!(
            h.subscription(&sub.id).await.status,
            SubscriptionStatus::Active
        );
    }

    h.gateway.set_charge_fails("card_declined");
    h.clock.advance_secs(600);
    let sweep = h.reconcile.handle().await.unwrap();
    assert_eq!(sweep.resolved, 1);
    assert_eq!(
        h.subscription(&sub.id).await.status,
        SubscriptionStatus::PastDue
    );
}

#[tokio::test]
async fn concurrent_duplicate_ingest_settles_to_one_application() {
    let h = harness(MockPaymentGateway::succeeding());
    let sub = h.create_subscription().await;
    let ingest = Arc::new(h.ingest);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ingest = ingest.clone();
        let event = LedgerEvent::new(
            IdempotencyKey::new("evt_cancel").unwrap(),
            sub.id,
            EventKind::CancelRequested,
            None,
            serde_json::json!({ "source": "gateway_callback" }),
            t0(),
        );
        handles.push(tokio::spawn(async move { ingest.handle(event).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = h.store.find_by_id(&sub.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Canceled);
    // The ledger holds exactly one record for the key.
    let recorded = h
        .ledger
        .find_by_key(&IdempotencyKey::new("evt_cancel").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(recorded.processed);
}
