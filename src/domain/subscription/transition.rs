//! Pure transition engine.
//!
//! Maps `(current subscription, ledger event)` to an updated subscription
//! snapshot plus the side-effect intents the caller must carry out. The
//! engine itself performs no I/O: charges, scheduling, and persistence are
//! all expressed as intents and executed by the application layer.
//!
//! # Event handling rules
//!
//! - Events for a subscription already in a terminal state are accepted
//!   and produce no state change (idempotent no-op), never an error.
//! - Charge outcomes are matched to the subscription's open billing cycle,
//!   not arrival order: last-applicable-by-cycle wins and duplicate
//!   outcomes for a settled cycle are no-ops.
//! - An event kind that is not valid for the current state is an
//!   `InvalidTransition` error; callers record and log it without
//!   mutating anything. It is never fatal.

use crate::domain::foundation::{CycleId, DomainError, SubscriptionId, Timestamp};
use crate::domain::ledger::{EventKind, LedgerEvent};
use crate::domain::scheduler::{DunningBackoff, TaskKind};

use super::{BillingPolicy, CancellationPolicy, Subscription, SubscriptionStatus};

/// Side effect the caller must carry out after persisting the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectIntent {
    /// Issue an idempotent charge for the cycle through the gateway,
    /// outside any lock held on the subscription.
    Charge {
        subscription_id: SubscriptionId,
        cycle_id: CycleId,
    },

    /// Emit a user-facing notification through the external notifier.
    Notify { kind: NotifyKind },

    /// Replace the task of this kind for the subscription, superseding
    /// any outstanding one.
    Schedule { kind: TaskKind, fire_at: Timestamp },

    /// Cancel every outstanding task for the subscription.
    CancelTasks,
}

/// Notification categories handed to the external notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    PaymentFailed,
    SubscriptionCanceled,
    SubscriptionExpired,
}

/// Why an accepted event produced no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The subscription is in a terminal state.
    TerminalState,

    /// The event's cycle does not match the open billing cycle (already
    /// settled, or never opened).
    CycleMismatch,

    /// The event is applicable but the state already reflects it.
    NoEffect,
}

/// Whether the event changed the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    NoOp(NoOpReason),
}

/// Result of applying one event.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Updated snapshot. Identical to the input for no-ops.
    pub subscription: Subscription,

    /// Side effects to carry out, in order.
    pub intents: Vec<EffectIntent>,

    /// Whether the event changed anything.
    pub disposition: Disposition,
}

impl TransitionOutcome {
    fn noop(subscription: Subscription, reason: NoOpReason) -> Self {
        Self {
            subscription,
            intents: Vec::new(),
            disposition: Disposition::NoOp(reason),
        }
    }

    fn applied(subscription: Subscription, intents: Vec<EffectIntent>) -> Self {
        Self {
            subscription,
            intents,
            disposition: Disposition::Applied,
        }
    }

    /// Returns true if the event changed the subscription.
    pub fn is_applied(&self) -> bool {
        matches!(self.disposition, Disposition::Applied)
    }
}

/// Applies one ledger event to a subscription snapshot.
///
/// # Errors
///
/// Returns `InvalidTransition` when the event kind is not valid for the
/// current state. The caller records the event, logs the error, and moves
/// on without mutating the subscription.
pub fn apply_event(
    subscription: &Subscription,
    event: &LedgerEvent,
    policy: &BillingPolicy,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    if !event.kind.drives_state_machine() {
        return Err(DomainError::invalid_transition(format!(
            "Event kind {} is an audit record, not a state machine input",
            event.kind
        )));
    }

    // Terminal states accept anything and change nothing.
    if subscription.is_terminal() {
        return Ok(TransitionOutcome::noop(
            subscription.clone(),
            NoOpReason::TerminalState,
        ));
    }

    match event.kind {
        EventKind::RenewalDue => on_renewal_due(subscription, now),
        EventKind::ChargeSucceeded => on_charge_succeeded(subscription, event, now),
        EventKind::ChargeFailed => on_charge_failed(subscription, event, policy, now),
        EventKind::CancelRequested => on_cancel_requested(subscription, policy, now),
        EventKind::ExpireGrace => on_expire_grace(subscription, now),
        EventKind::ReconcileTick | EventKind::ChargeRequested => unreachable!(),
    }
}

/// A renewal or dunning charge attempt is due.
///
/// Valid in `Trialing`, `Active` (scheduled renewal) and `PastDue`
/// (dunning retry). The status does not change until the charge outcome
/// arrives.
fn on_renewal_due(
    subscription: &Subscription,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    match subscription.status {
        SubscriptionStatus::Trialing | SubscriptionStatus::Active => {
            // An at-period-end cancellation converts the renewal into the
            // cancellation itself; no further charge intents are issued.
            if subscription.cancel_requested {
                let mut next = subscription.clone();
                next.cancel(now)?;
                return Ok(TransitionOutcome::applied(
                    next,
                    vec![
                        EffectIntent::CancelTasks,
                        EffectIntent::Notify {
                            kind: NotifyKind::SubscriptionCanceled,
                        },
                    ],
                ));
            }

            let mut next = subscription.clone();
            // A refire after a crash reuses the open cycle; the gateway
            // deduplicates by cycle id.
            let cycle_id = match next.open_cycle {
                Some(cycle) => cycle,
                None => {
                    let cycle = CycleId::new();
                    next.open_billing_cycle(cycle, now)?;
                    cycle
                }
            };
            Ok(TransitionOutcome::applied(
                next,
                vec![EffectIntent::Charge {
                    subscription_id: subscription.id,
                    cycle_id,
                }],
            ))
        }
        SubscriptionStatus::PastDue => {
            let mut next = subscription.clone();
            let cycle_id = match next.open_cycle {
                Some(cycle) => cycle,
                None => {
                    let cycle = CycleId::new();
                    next.open_billing_cycle(cycle, now)?;
                    cycle
                }
            };
            Ok(TransitionOutcome::applied(
                next,
                vec![EffectIntent::Charge {
                    subscription_id: subscription.id,
                    cycle_id,
                }],
            ))
        }
        _ => Err(DomainError::invalid_transition(format!(
            "renewal_due is not valid in {:?}",
            subscription.status
        ))),
    }
}

/// A charge succeeded. Applicable only to the open billing cycle.
fn on_charge_succeeded(
    subscription: &Subscription,
    event: &LedgerEvent,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    if subscription.open_cycle.is_none() || subscription.open_cycle != event.cycle_id {
        return Ok(TransitionOutcome::noop(
            subscription.clone(),
            NoOpReason::CycleMismatch,
        ));
    }

    let mut next = subscription.clone();
    next.roll_period(now)?;
    let renew_at = next.current_period_end;
    Ok(TransitionOutcome::applied(
        next,
        vec![
            EffectIntent::CancelTasks,
            EffectIntent::Schedule {
                kind: TaskKind::AttemptRenewal,
                fire_at: renew_at,
            },
        ],
    ))
}

/// A charge failed. Applicable only to the open billing cycle.
fn on_charge_failed(
    subscription: &Subscription,
    event: &LedgerEvent,
    policy: &BillingPolicy,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    if subscription.open_cycle.is_none() || subscription.open_cycle != event.cycle_id {
        return Ok(TransitionOutcome::noop(
            subscription.clone(),
            NoOpReason::CycleMismatch,
        ));
    }

    let backoff = DunningBackoff::new(policy.backoff_base_secs, policy.backoff_cap_secs);

    match subscription.status {
        SubscriptionStatus::Trialing | SubscriptionStatus::Active => {
            let mut next = subscription.clone();
            let retry_at = now.plus_secs(backoff.delay_secs(&subscription.id, 1));
            next.mark_past_due(retry_at, now)?;
            Ok(TransitionOutcome::applied(
                next,
                vec![
                    EffectIntent::Schedule {
                        kind: TaskKind::RetryDunning,
                        fire_at: retry_at,
                    },
                    EffectIntent::Notify {
                        kind: NotifyKind::PaymentFailed,
                    },
                ],
            ))
        }
        SubscriptionStatus::PastDue => {
            let mut next = subscription.clone();
            if subscription.retry_count >= policy.max_retries {
                let grace_expires_at = now.add_days(i64::from(policy.grace_days));
                next.enter_grace_period(grace_expires_at, now)?;
                Ok(TransitionOutcome::applied(
                    next,
                    vec![
                        EffectIntent::Schedule {
                            kind: TaskKind::ExpireGrace,
                            fire_at: grace_expires_at,
                        },
                        EffectIntent::Notify {
                            kind: NotifyKind::PaymentFailed,
                        },
                    ],
                ))
            } else {
                let attempt = subscription.retry_count + 1;
                let retry_at = now.plus_secs(backoff.delay_secs(&subscription.id, attempt));
                next.record_retry_failure(retry_at, now)?;
                Ok(TransitionOutcome::applied(
                    next,
                    vec![
                        EffectIntent::Schedule {
                            kind: TaskKind::RetryDunning,
                            fire_at: retry_at,
                        },
                        EffectIntent::Notify {
                            kind: NotifyKind::PaymentFailed,
                        },
                    ],
                ))
            }
        }
        SubscriptionStatus::GracePeriod => {
            // Dunning is already exhausted; the grace clock keeps running.
            Ok(TransitionOutcome::noop(
                subscription.clone(),
                NoOpReason::NoEffect,
            ))
        }
        _ => Err(DomainError::invalid_transition(format!(
            "charge_failed is not valid in {:?}",
            subscription.status
        ))),
    }
}

/// The user asked to cancel.
///
/// With the immediate policy the subscription cancels now. With the
/// at-period-end policy an `Active`/`Trialing` subscription is flagged and
/// cancels at its next renewal due; a subscription already in dunning or
/// grace cancels immediately since no further renewal fire is coming.
fn on_cancel_requested(
    subscription: &Subscription,
    policy: &BillingPolicy,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    let defer = policy.cancellation == CancellationPolicy::AtPeriodEnd
        && matches!(
            subscription.status,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active
        );

    if defer {
        if subscription.cancel_requested {
            return Ok(TransitionOutcome::noop(
                subscription.clone(),
                NoOpReason::NoEffect,
            ));
        }
        let mut next = subscription.clone();
        next.request_cancel_at_period_end(now)?;
        return Ok(TransitionOutcome::applied(next, Vec::new()));
    }

    let mut next = subscription.clone();
    next.cancel(now)?;
    Ok(TransitionOutcome::applied(
        next,
        vec![
            EffectIntent::CancelTasks,
            EffectIntent::Notify {
                kind: NotifyKind::SubscriptionCanceled,
            },
        ],
    ))
}

/// The grace period elapsed with no intervening successful charge.
fn on_expire_grace(
    subscription: &Subscription,
    now: Timestamp,
) -> Result<TransitionOutcome, DomainError> {
    if subscription.status != SubscriptionStatus::GracePeriod {
        return Err(DomainError::invalid_transition(format!(
            "expire_grace is not valid in {:?}",
            subscription.status
        )));
    }

    let mut next = subscription.clone();
    next.expire(now)?;
    Ok(TransitionOutcome::applied(
        next,
        vec![
            EffectIntent::CancelTasks,
            EffectIntent::Notify {
                kind: NotifyKind::SubscriptionExpired,
            },
        ],
    ))
}
