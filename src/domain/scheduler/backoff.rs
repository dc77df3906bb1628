//! Dunning retry backoff.
//!
//! Exponential in the retry count, capped, and jittered by up to +/-10%
//! so many subscriptions sharing a billing day do not retry in lockstep.
//! The jitter is derived deterministically from the subscription id and
//! retry count: reproducible in tests, still spread across a fleet.

use crate::domain::foundation::SubscriptionId;

/// Backoff schedule for dunning retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DunningBackoff {
    /// Delay before the first retry, in seconds.
    pub base_secs: u64,

    /// Upper bound on any retry delay, in seconds.
    pub cap_secs: u64,
}

impl DunningBackoff {
    /// Creates a backoff schedule. The cap is raised to the base if
    /// configured lower.
    pub fn new(base_secs: u64, cap_secs: u64) -> Self {
        Self {
            base_secs,
            cap_secs: cap_secs.max(base_secs),
        }
    }

    /// Unjittered delay for the given retry: `base * 2^(retry-1)`, capped.
    ///
    /// Non-decreasing in `retry_count` until the cap is reached. A retry
    /// count of 0 is treated as 1.
    pub fn raw_delay_secs(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(63);
        self.base_secs
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX))
            .min(self.cap_secs)
    }

    /// Jittered delay for the given subscription and retry.
    ///
    /// The result stays within +/-10% of the raw delay and never exceeds
    /// 110% of the cap.
    pub fn delay_secs(&self, subscription_id: &SubscriptionId, retry_count: u32) -> u64 {
        let raw = self.raw_delay_secs(retry_count);
        let spread = raw / 10;
        if spread == 0 {
            return raw;
        }
        // Offset in [-spread, +spread], deterministic per (id, retry).
        let roll = jitter_hash(subscription_id, retry_count) % (2 * spread + 1);
        raw - spread + roll
    }
}

/// FNV-1a over the subscription id bytes and retry count.
fn jitter_hash(subscription_id: &SubscriptionId, retry_count: u32) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in subscription_id.as_uuid().as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    for byte in retry_count.to_le_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
