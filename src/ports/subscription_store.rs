//! Subscription store port (write side).
//!
//! Defines the persistence contract for Subscription aggregates.
//!
//! # Design
//!
//! - **Optimistic concurrency**: updates carry the version the caller
//!   read; the store applies them atomically only if the stored version
//!   still matches, and bumps the version on success. This is how
//!   per-subscription mutation is serialized across concurrent workers
//!   without a global lock.
//! - **Due scan**: `find_next_due_before` backs the reconciliation
//!   driver's detection of subscriptions whose due work was lost in a
//!   crash window.

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::domain::subscription::Subscription;
use async_trait::async_trait;

/// Result of a compare-and-set update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// The update was applied; the stored version was bumped.
    Updated,
    /// The stored version no longer matches; the caller must re-read
    /// and retry.
    VersionMismatch,
}

/// Repository port for Subscription aggregate persistence.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new subscription.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` if the id already exists
    /// - `StorageError` on persistence failure
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Find a subscription by its id.
    ///
    /// Returns `None` if not found.
    async fn find_by_id(&self, id: &SubscriptionId)
        -> Result<Option<Subscription>, DomainError>;

    /// Atomically update the subscription if its stored version equals
    /// `expected_version`.
    ///
    /// On `Updated` the stored version becomes `expected_version + 1`.
    /// On `VersionMismatch` nothing was written.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the subscription doesn't exist
    /// - `StorageError` on persistence failure
    async fn update_if_version(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<CasResult, DomainError>;

    /// Find non-terminal subscriptions whose `next_due` is at or before
    /// the cutoff, ordered by `next_due` ascending.
    ///
    /// Used by reconciliation to find due work that lost its scheduled
    /// task in a crash window.
    async fn find_next_due_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety test
    #[test]
    fn subscription_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn SubscriptionStore) {}
    }
}
