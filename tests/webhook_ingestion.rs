//! Integration test for the webhook ingress path.
//!
//! A raw signed gateway delivery is verified, parsed into a ledger
//! event, and ingested - the full path an ingress collaborator follows.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use subscription_engine::adapters::gateway::MockPaymentGateway;
use subscription_engine::adapters::memory::{
    InMemoryEventLedger, InMemorySubscriptionStore, InMemoryTaskStore, ManualClock,
};
use subscription_engine::application::{EventApplier, IngestEventHandler, IngestOutcome};
use subscription_engine::domain::foundation::{SubscriptionId, Timestamp};
use subscription_engine::domain::subscription::{BillingPolicy, Subscription, SubscriptionStatus};
use subscription_engine::domain::webhook::WebhookVerifier;
use subscription_engine::ports::Clock;
use subscription_engine::ports::SubscriptionStore;

const SECRET: &str = "whsec_integration_secret";

fn t0() -> Timestamp {
    Timestamp::from_unix_secs(1_700_000_000)
}

fn sign(payload: &[u8], timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn signed_cancellation_webhook_cancels_the_subscription() {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let subscription = Subscription::create(SubscriptionId::new(), 30, t0());
    store.insert(&subscription).await.unwrap();

    let applier = Arc::new(EventApplier::new(
        store.clone(),
        Arc::new(InMemoryEventLedger::new()),
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(MockPaymentGateway::succeeding()),
        clock.clone(),
        BillingPolicy::default(),
        Duration::from_secs(5),
    ));
    let ingest = IngestEventHandler::new(applier);

    let payload = format!(
        r#"{{"id":"evt_wh_1","type":"subscription.cancel_requested","created":{},"data":{{"subscription_id":"{}"}}}}"#,
        t0().as_unix_secs(),
        subscription.id,
    )
    .into_bytes();
    let header = sign(&payload, t0().as_unix_secs() as i64);

    let verifier = WebhookVerifier::new(SECRET);
    let callback = verifier
        .verify_and_parse(&payload, &header, clock.now())
        .unwrap();
    let event = callback.into_ledger_event(clock.now()).unwrap();

    let outcome = ingest.handle(event).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Accepted);

    let stored = store.find_by_id(&subscription.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn tampered_webhook_never_reaches_ingestion() {
    let payload = br#"{"id":"evt_wh_2","type":"subscription.cancel_requested"}"#.to_vec();
    let header = sign(&payload, t0().as_unix_secs() as i64);

    let mut tampered = payload.clone();
    tampered[12] ^= 1;

    let verifier = WebhookVerifier::new(SECRET);
    assert!(verifier.verify_and_parse(&tampered, &header, t0()).is_err());
}
