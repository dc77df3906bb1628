//! Billing lifecycle configuration

use serde::Deserialize;

use crate::domain::subscription::{BillingPolicy, CancellationPolicy};

use super::error::ValidationError;

fn default_period_days() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff_base_secs() -> u64 {
    6 * 60 * 60
}

fn default_backoff_cap_secs() -> u64 {
    48 * 60 * 60
}

fn default_grace_days() -> u32 {
    7
}

/// Billing lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Billing period length in days for new subscriptions
    #[serde(default = "default_period_days")]
    pub period_days: u32,

    /// Dunning retries allowed before escalating to the grace period
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for the first dunning retry, in seconds
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on any dunning retry delay, in seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Grace period length in days
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,

    /// Optional trial length in days for new subscriptions
    #[serde(default)]
    pub trial_days: Option<u32>,

    /// When cancellation requests take effect
    #[serde(default)]
    pub cancellation: CancellationPolicy,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            grace_days: default_grace_days(),
            trial_days: None,
            cancellation: CancellationPolicy::default(),
        }
    }
}

impl BillingConfig {
    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.period_days == 0 {
            return Err(ValidationError::InvalidPeriodLength);
        }
        if self.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries);
        }
        if self.backoff_base_secs == 0 {
            return Err(ValidationError::InvalidBackoffBase);
        }
        if self.backoff_cap_secs < self.backoff_base_secs {
            return Err(ValidationError::InvalidBackoffCap);
        }
        if self.grace_days == 0 {
            return Err(ValidationError::InvalidGraceLength);
        }
        Ok(())
    }

    /// The validated domain policy derived from this configuration
    pub fn to_policy(&self) -> BillingPolicy {
        BillingPolicy {
            period_days: self.period_days,
            max_retries: self.max_retries,
            backoff_base_secs: self.backoff_base_secs,
            backoff_cap_secs: self.backoff_cap_secs,
            grace_days: self.grace_days,
            trial_days: self.trial_days,
            cancellation: self.cancellation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BillingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_period_is_rejected() {
        let config = BillingConfig {
            period_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cap_below_base_is_rejected() {
        let config = BillingConfig {
            backoff_base_secs: 3600,
            backoff_cap_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        let config = BillingConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn to_policy_carries_all_fields() {
        let config = BillingConfig {
            period_days: 365,
            max_retries: 2,
            trial_days: Some(14),
            cancellation: CancellationPolicy::AtPeriodEnd,
            ..Default::default()
        };
        let policy = config.to_policy();
        assert_eq!(policy.period_days, 365);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.trial_days, Some(14));
        assert_eq!(policy.cancellation, CancellationPolicy::AtPeriodEnd);
    }
}
