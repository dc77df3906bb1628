//! In-memory implementation of SubscriptionStore.
//!
//! Reference implementation of the persistence contract, used by the
//! crate's own tests and as a template for real adapters. The
//! compare-and-set semantics here are the behavior the PostgreSQL
//! adapter reproduces with a conditional `UPDATE ... WHERE version = $n`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::domain::subscription::Subscription;
use crate::ports::{CasResult, SubscriptionStore};

/// In-memory subscription store with optimistic versioning.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::validation(
                "subscription_id",
                "Subscription already exists",
            ));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn update_if_version(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<CasResult, DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions.get_mut(&subscription.id).ok_or_else(|| {
            DomainError::new(
                crate::domain::foundation::ErrorCode::SubscriptionNotFound,
                "Subscription not found",
            )
        })?;

        if stored.version != expected_version {
            return Ok(CasResult::VersionMismatch);
        }

        let mut updated = subscription.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(CasResult::Updated)
    }

    async fn find_next_due_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let subscriptions = self.subscriptions.read().await;
        let mut due: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| !s.is_terminal())
            .filter(|s| s.next_due.map(|d| d <= cutoff).unwrap_or(false))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.next_due, s.id));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000)
    }

    #[tokio::test]
    async fn insert_then_find_roundtrips() {
        let store = InMemorySubscriptionStore::new();
        let sub = Subscription::create(SubscriptionId::new(), 30, t0());

        store.insert(&sub).await.unwrap();
        let found = store.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(found, sub);
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let store = InMemorySubscriptionStore::new();
        let sub = Subscription::create(SubscriptionId::new(), 30, t0());

        store.insert(&sub).await.unwrap();
        assert!(store.insert(&sub).await.is_err());
    }

    #[tokio::test]
    async fn cas_applies_on_matching_version_and_bumps_it() {
        let store = InMemorySubscriptionStore::new();
        let mut sub = Subscription::create(SubscriptionId::new(), 30, t0());
        store.insert(&sub).await.unwrap();

        sub.cancel(t0()).unwrap();
        let result = store.update_if_version(&sub, 0).await.unwrap();
        assert_eq!(result, CasResult::Updated);

        let stored = store.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.is_terminal());
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let store = InMemorySubscriptionStore::new();
        let sub = Subscription::create(SubscriptionId::new(), 30, t0());
        store.insert(&sub).await.unwrap();

        store.update_if_version(&sub, 0).await.unwrap();
        // Second writer still holds version 0.
        let result = store.update_if_version(&sub, 0).await.unwrap();
        assert_eq!(result, CasResult::VersionMismatch);
    }

    #[tokio::test]
    async fn concurrent_cas_writers_serialize() {
        use std::sync::Arc;

        let store = Arc::new(InMemorySubscriptionStore::new());
        let sub = Subscription::create(SubscriptionId::new(), 30, t0());
        store.insert(&sub).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let sub = sub.clone();
            handles.push(tokio::spawn(async move {
                store.update_if_version(&sub, 0).await.unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() == CasResult::Updated {
                wins += 1;
            }
        }
        // Exactly one writer saw version 0.
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn find_next_due_before_filters_and_orders() {
        let store = InMemorySubscriptionStore::new();

        let early = Subscription::create(SubscriptionId::new(), 10, t0());
        let late = Subscription::create(SubscriptionId::new(), 20, t0());
        let mut terminal = Subscription::create(SubscriptionId::new(), 5, t0());
        terminal.cancel(t0()).unwrap();

        store.insert(&early).await.unwrap();
        store.insert(&late).await.unwrap();
        store.insert(&terminal).await.unwrap();

        let due = store.find_next_due_before(t0().add_days(15)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);

        let due = store.find_next_due_before(t0().add_days(30)).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, early.id);
        assert_eq!(due[1].id, late.id);
    }
}
