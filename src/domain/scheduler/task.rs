//! Scheduled task model.
//!
//! Time-based transitions are explicit, durable task rows polled by fire
//! time, never language-level timers, so fires survive restarts and are
//! replayable in tests through the injected clock.

use crate::domain::foundation::{SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Attempt the next renewal charge.
    AttemptRenewal,

    /// Expire a subscription whose grace period has elapsed.
    ExpireGrace,

    /// Retry a failed renewal charge (dunning).
    RetryDunning,
}

impl TaskKind {
    /// Stable string form used for storage, logging, and idempotency keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AttemptRenewal => "attempt_renewal",
            TaskKind::ExpireGrace => "expire_grace",
            TaskKind::RetryDunning => "retry_dunning",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attempt_renewal" => Some(TaskKind::AttemptRenewal),
            "expire_grace" => Some(TaskKind::ExpireGrace),
            "retry_dunning" => Some(TaskKind::RetryDunning),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable scheduled task.
///
/// At most one task of a given kind is outstanding per subscription;
/// scheduling again replaces it under a higher generation, so a stale
/// fire of the superseded task is recognized and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Subscription this task belongs to.
    pub subscription_id: SubscriptionId,

    /// What to do when the task fires.
    pub kind: TaskKind,

    /// When the task becomes due.
    pub fire_at: Timestamp,

    /// Scheduling generation; compared against the subscription's latest
    /// recorded generation at fire time.
    pub generation: u64,
}

impl ScheduledTask {
    /// Creates a new task.
    pub fn new(
        subscription_id: SubscriptionId,
        kind: TaskKind,
        fire_at: Timestamp,
        generation: u64,
    ) -> Self {
        Self {
            subscription_id,
            kind,
            fire_at,
            generation,
        }
    }

    /// Returns true if the task is due at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.fire_at <= now
    }

    /// Deterministic due ordering: fire time ascending, then subscription
    /// id as tie-break, so concurrent pollers and tests agree on order.
    pub fn due_order(&self, other: &ScheduledTask) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.subscription_id.cmp(&other.subscription_id))
    }
}
