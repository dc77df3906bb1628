//! Subscription status state machine.
//!
//! Defines all possible subscription states and valid transitions
//! according to the billing lifecycle.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Subscription lifecycle status.
///
/// `Canceled` and `Expired` are terminal: once reached, no further
/// transition is valid and events targeting the subscription are recorded
/// as idempotent no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Initial state when a trial is configured. No charge has been made;
    /// the first renewal attempt fires at trial end.
    Trialing,

    /// Paid up for the current period.
    Active,

    /// A renewal charge failed; dunning retries are in progress.
    PastDue,

    /// Dunning retries exhausted. The subscription remains nominally
    /// usable until the grace period expires.
    GracePeriod,

    /// Cancellation applied. Terminal.
    Canceled,

    /// Grace period elapsed without a successful charge. Terminal.
    Expired,
}

impl SubscriptionStatus {
    /// Returns true if a billing charge may still be issued in this state.
    ///
    /// Once terminal, no charge intent is ever emitted again.
    pub fn billable(&self) -> bool {
        !self.is_terminal()
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From TRIALING: first charge settles the trial
            (Trialing, Active)
                | (Trialing, PastDue)
                | (Trialing, Canceled)
            // From ACTIVE
                | (Active, Active) // renewal rolls the period
                | (Active, PastDue)
                | (Active, Canceled)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, GracePeriod)
                | (PastDue, Canceled)
            // From GRACE_PERIOD
                | (GracePeriod, Active)
                | (GracePeriod, Expired)
                | (GracePeriod, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trialing => vec![Active, PastDue, Canceled],
            Active => vec![Active, PastDue, Canceled],
            PastDue => vec![Active, GracePeriod, Canceled],
            GracePeriod => vec![Active, Expired, Canceled],
            Canceled => vec![],
            Expired => vec![],
        }
    }
}
