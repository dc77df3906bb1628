//! Subscription aggregate entity.
//!
//! The Subscription aggregate is the unit of consistency for the billing
//! lifecycle. All state changes go through validated transitions and are
//! persisted with an optimistic version check, so concurrent workers
//! serialize per subscription without a global lock.
//!
//! # Design Decisions
//!
//! - **Injected time**: every mutation takes `now` from the caller, which
//!   gets it from the injected clock. The aggregate never reads wall-clock.
//! - **Cycle-keyed billing**: `open_cycle` identifies the billing cycle
//!   awaiting a charge outcome. Outcome events are matched by cycle id,
//!   not arrival order.
//! - **Terminal means terminal**: once `Canceled` or `Expired`, `next_due`
//!   is cleared and no further charge intent is ever emitted.

use crate::domain::foundation::{
    CycleId, DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp,
};
use serde::{Deserialize, Serialize};

use super::SubscriptionStatus;

/// Subscription aggregate - drives the renewal/billing lifecycle.
///
/// # Invariants
///
/// - `next_due` is `None` exactly in terminal states; otherwise it is
///   always >= `current_period_start`.
/// - `open_cycle` is `Some` only while a charge outcome is awaited.
/// - `generation` is the latest scheduling generation; task fires carrying
///   an older generation are stale and must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Current status in the billing lifecycle.
    pub status: SubscriptionStatus,

    /// Billing period length in days.
    pub period_days: u32,

    /// Start of current billing period.
    pub current_period_start: Timestamp,

    /// End of current billing period.
    pub current_period_end: Timestamp,

    /// When the next time-based transition is due. `None` only in
    /// terminal states.
    pub next_due: Option<Timestamp>,

    /// Failed charge attempts for the open billing cycle.
    pub retry_count: u32,

    /// Set when a cancellation request has been received.
    pub cancel_requested: bool,

    /// Billing cycle awaiting a charge outcome, if any.
    pub open_cycle: Option<CycleId>,

    /// Latest scheduling generation recorded for this subscription.
    pub generation: u64,

    /// Optimistic concurrency version, bumped by the store on update.
    pub version: u64,

    /// When the subscription was created.
    pub created_at: Timestamp,

    /// When the subscription was last updated.
    pub updated_at: Timestamp,

    /// When the subscription was canceled (if canceled).
    pub canceled_at: Option<Timestamp>,
}

impl Subscription {
    /// Create a new active subscription with its first period already paid.
    ///
    /// The first renewal comes due at period end.
    pub fn create(id: SubscriptionId, period_days: u32, now: Timestamp) -> Self {
        let period_end = now.add_days(i64::from(period_days));
        Self {
            id,
            status: SubscriptionStatus::Active,
            period_days,
            current_period_start: now,
            current_period_end: period_end,
            next_due: Some(period_end),
            retry_count: 0,
            cancel_requested: false,
            open_cycle: None,
            generation: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }

    /// Create a new trialing subscription.
    ///
    /// The first charge attempt comes due at trial end.
    pub fn create_with_trial(
        id: SubscriptionId,
        period_days: u32,
        trial_days: u32,
        now: Timestamp,
    ) -> Self {
        let trial_end = now.add_days(i64::from(trial_days));
        Self {
            id,
            status: SubscriptionStatus::Trialing,
            period_days,
            current_period_start: now,
            current_period_end: trial_end,
            next_due: Some(trial_end),
            retry_count: 0,
            cancel_requested: false,
            open_cycle: None,
            generation: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }

    /// Returns true if this subscription is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Open a billing cycle for the upcoming charge attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if a cycle is already open or the
    /// subscription is terminal.
    pub fn open_billing_cycle(
        &mut self,
        cycle: CycleId,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "Cannot open a billing cycle in terminal state {:?}",
                self.status
            )));
        }
        if self.open_cycle.is_some() {
            return Err(DomainError::invalid_transition(
                "A billing cycle is already awaiting an outcome",
            ));
        }
        self.open_cycle = Some(cycle);
        self.updated_at = now;
        Ok(())
    }

    /// Settle a successful charge: roll the period forward and return to
    /// `Active`.
    ///
    /// The new period starts where the old one ended so renewal timing
    /// does not drift with processing latency. Clears retry state and the
    /// open cycle, and points `next_due` at the new period end.
    ///
    /// # Errors
    ///
    /// Returns error if transition to `Active` is not allowed from the
    /// current status.
    pub fn roll_period(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Active)?;
        let new_start = self.current_period_end;
        let new_end = new_start.add_days(i64::from(self.period_days));
        self.current_period_start = new_start;
        self.current_period_end = new_end;
        self.next_due = Some(new_end);
        self.retry_count = 0;
        self.open_cycle = None;
        self.updated_at = now;
        Ok(())
    }

    /// Record the first charge failure of the open cycle.
    ///
    /// Moves to `PastDue` with `retry_count` 1 and the first dunning retry
    /// due at `next_retry_at`.
    ///
    /// # Errors
    ///
    /// Returns error if transition from the current status is not allowed.
    pub fn mark_past_due(
        &mut self,
        next_retry_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::PastDue)?;
        self.retry_count = 1;
        self.next_due = Some(next_retry_at);
        self.updated_at = now;
        Ok(())
    }

    /// Record a subsequent charge failure while already past due.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the subscription is not `PastDue`.
    pub fn record_retry_failure(
        &mut self,
        next_retry_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if self.status != SubscriptionStatus::PastDue {
            return Err(DomainError::invalid_transition(format!(
                "Cannot record a dunning retry failure in {:?}",
                self.status
            )));
        }
        self.retry_count += 1;
        self.next_due = Some(next_retry_at);
        self.updated_at = now;
        Ok(())
    }

    /// Escalate exhausted dunning retries into the grace period.
    ///
    /// # Errors
    ///
    /// Returns error if transition from the current status is not allowed.
    pub fn enter_grace_period(
        &mut self,
        grace_expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::GracePeriod)?;
        self.next_due = Some(grace_expires_at);
        self.updated_at = now;
        Ok(())
    }

    /// Expire the subscription after the grace period lapsed. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if transition from the current status is not allowed.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Expired)?;
        self.next_due = None;
        self.open_cycle = None;
        self.updated_at = now;
        Ok(())
    }

    /// Cancel the subscription. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if transition from the current status is not allowed.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Canceled)?;
        self.cancel_requested = true;
        self.canceled_at = Some(now);
        self.next_due = None;
        self.open_cycle = None;
        self.updated_at = now;
        Ok(())
    }

    /// Flag the subscription to cancel at the end of the current period.
    ///
    /// The status is unchanged; the next renewal due converts the flag
    /// into a cancellation instead of a charge.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the subscription is terminal.
    pub fn request_cancel_at_period_end(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "Cannot request cancellation in terminal state {:?}",
                self.status
            )));
        }
        self.cancel_requested = true;
        self.updated_at = now;
        Ok(())
    }

    /// Advance the scheduling generation and return the new value.
    ///
    /// Called whenever a task is (re)scheduled for this subscription, so
    /// superseded fires can be recognized and discarded.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Transition to a new status using the state machine.
    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidTransition,
                format!(
                    "Cannot transition subscription from {:?} to {:?}",
                    self.status, target
                ),
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000)
    }

    fn active_subscription() -> Subscription {
        Subscription::create(SubscriptionId::new(), 30, t0())
    }

    // Construction tests

    #[test]
    fn create_starts_active_with_renewal_due_at_period_end() {
        let sub = active_subscription();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.current_period_end, t0().add_days(30));
        assert_eq!(sub.next_due, Some(t0().add_days(30)));
        assert_eq!(sub.retry_count, 0);
        assert!(sub.open_cycle.is_none());
    }

    #[test]
    fn create_with_trial_starts_trialing() {
        let sub = Subscription::create_with_trial(SubscriptionId::new(), 30, 14, t0());

        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.next_due, Some(t0().add_days(14)));
    }

    // Billing cycle tests

    #[test]
    fn open_billing_cycle_records_cycle() {
        let mut sub = active_subscription();
        let cycle = CycleId::new();

        sub.open_billing_cycle(cycle, t0()).unwrap();
        assert_eq!(sub.open_cycle, Some(cycle));
    }

    #[test]
    fn open_billing_cycle_rejects_second_open() {
        let mut sub = active_subscription();
        sub.open_billing_cycle(CycleId::new(), t0()).unwrap();

        let result = sub.open_billing_cycle(CycleId::new(), t0());
        assert!(result.is_err());
    }

    #[test]
    fn roll_period_starts_new_period_at_old_end() {
        let mut sub = active_subscription();
        sub.open_billing_cycle(CycleId::new(), sub.current_period_end)
            .unwrap();

        let settle_at = sub.current_period_end.plus_secs(120);
        sub.roll_period(settle_at).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.current_period_start, t0().add_days(30));
        assert_eq!(sub.current_period_end, t0().add_days(60));
        assert_eq!(sub.next_due, Some(t0().add_days(60)));
        assert_eq!(sub.retry_count, 0);
        assert!(sub.open_cycle.is_none());
    }

    // Dunning tests

    #[test]
    fn mark_past_due_sets_first_retry() {
        let mut sub = active_subscription();
        let retry_at = t0().add_days(31);

        sub.mark_past_due(retry_at, t0().add_days(30)).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.retry_count, 1);
        assert_eq!(sub.next_due, Some(retry_at));
    }

    #[test]
    fn record_retry_failure_increments_count() {
        let mut sub = active_subscription();
        sub.mark_past_due(t0().add_days(31), t0()).unwrap();

        sub.record_retry_failure(t0().add_days(33), t0()).unwrap();
        assert_eq!(sub.retry_count, 2);
        assert_eq!(sub.next_due, Some(t0().add_days(33)));
    }

    #[test]
    fn record_retry_failure_rejected_outside_past_due() {
        let mut sub = active_subscription();
        let result = sub.record_retry_failure(t0().add_days(1), t0());
        assert!(result.is_err());
    }

    #[test]
    fn past_due_recovery_rolls_period_and_clears_retries() {
        let mut sub = active_subscription();
        sub.open_billing_cycle(CycleId::new(), t0()).unwrap();
        sub.mark_past_due(t0().add_days(31), t0()).unwrap();

        sub.roll_period(t0().add_days(32)).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.retry_count, 0);
        assert!(sub.open_cycle.is_none());
    }

    // Grace period tests

    #[test]
    fn enter_grace_period_sets_expiry_due() {
        let mut sub = active_subscription();
        sub.mark_past_due(t0().add_days(31), t0()).unwrap();
        let grace_end = t0().add_days(40);

        sub.enter_grace_period(grace_end, t0().add_days(33)).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::GracePeriod);
        assert_eq!(sub.next_due, Some(grace_end));
    }

    #[test]
    fn expire_clears_next_due_and_open_cycle() {
        let mut sub = active_subscription();
        sub.open_billing_cycle(CycleId::new(), t0()).unwrap();
        sub.mark_past_due(t0().add_days(31), t0()).unwrap();
        sub.enter_grace_period(t0().add_days(40), t0()).unwrap();

        sub.expire(t0().add_days(40)).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert!(sub.next_due.is_none());
        assert!(sub.open_cycle.is_none());
        assert!(sub.is_terminal());
    }

    // Cancellation tests

    #[test]
    fn cancel_is_terminal_and_clears_next_due() {
        let mut sub = active_subscription();

        sub.cancel(t0().add_days(5)).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.cancel_requested);
        assert!(sub.next_due.is_none());
        assert_eq!(sub.canceled_at, Some(t0().add_days(5)));
        assert!(sub.is_terminal());
    }

    #[test]
    fn cancel_from_terminal_is_rejected() {
        let mut sub = active_subscription();
        sub.cancel(t0()).unwrap();

        assert!(sub.cancel(t0()).is_err());
    }

    #[test]
    fn request_cancel_at_period_end_keeps_status() {
        let mut sub = active_subscription();

        sub.request_cancel_at_period_end(t0()).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.cancel_requested);
        assert!(sub.next_due.is_some());
    }

    // Generation tests

    #[test]
    fn bump_generation_is_monotonic() {
        let mut sub = active_subscription();
        let g1 = sub.bump_generation();
        let g2 = sub.bump_generation();
        assert!(g2 > g1);
        assert_eq!(sub.generation, g2);
    }

    // Invariant tests

    #[test]
    fn next_due_never_before_period_start_in_non_terminal_states() {
        let mut sub = active_subscription();
        assert!(sub.next_due.unwrap() >= sub.current_period_start);

        sub.mark_past_due(t0().add_days(31), t0()).unwrap();
        assert!(sub.next_due.unwrap() >= sub.current_period_start);

        sub.enter_grace_period(t0().add_days(40), t0()).unwrap();
        assert!(sub.next_due.unwrap() >= sub.current_period_start);
    }
}
