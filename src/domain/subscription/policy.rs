//! Billing policy - configured knobs that drive lifecycle decisions.

use serde::{Deserialize, Serialize};

/// When a cancellation request takes effect.
///
/// Both behaviors are common in billing systems, so this is a
/// configuration point rather than a fixed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Cancel as soon as the request is applied.
    Immediate,

    /// Keep the subscription active until the current period ends, then
    /// cancel instead of renewing.
    AtPeriodEnd,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        CancellationPolicy::Immediate
    }
}

/// Lifecycle policy applied by the transition engine.
///
/// Derived from [`crate::config::BillingConfig`] at startup; the domain
/// layer only ever sees this validated form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPolicy {
    /// Billing period length in days for new subscriptions.
    pub period_days: u32,

    /// Dunning retries allowed before escalating to the grace period.
    pub max_retries: u32,

    /// Base delay for the first dunning retry, in seconds.
    pub backoff_base_secs: u64,

    /// Upper bound on any dunning retry delay, in seconds.
    pub backoff_cap_secs: u64,

    /// Grace period length in days.
    pub grace_days: u32,

    /// Optional trial length in days for new subscriptions.
    pub trial_days: Option<u32>,

    /// When cancellation requests take effect.
    pub cancellation: CancellationPolicy,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            period_days: 30,
            max_retries: 4,
            backoff_base_secs: 6 * 60 * 60,
            backoff_cap_secs: 48 * 60 * 60,
            grace_days: 7,
            trial_days: None,
            cancellation: CancellationPolicy::Immediate,
        }
    }
}
