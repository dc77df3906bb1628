//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment
//! variables using the `config` and `dotenvy` crates. Configuration is
//! loaded with the `SUBSCRIPTION_ENGINE` prefix and nested values use
//! double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use subscription_engine::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod error;
mod gateway;
mod reconciliation;
mod scheduler;

pub use billing::BillingConfig;
pub use error::{ConfigError, ValidationError};
pub use gateway::GatewayConfig;
pub use reconciliation::ReconciliationConfig;
pub use scheduler::SchedulerConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Contains all configuration sections for the subscription engine.
/// Load using [`AppConfig::load()`] which reads from environment
/// variables. Invalid configuration at startup is the only fatal
/// condition in the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Billing lifecycle configuration
    #[serde(default)]
    pub billing: BillingConfig,

    /// Payment gateway configuration
    pub gateway: GatewayConfig,

    /// Renewal scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Reconciliation driver configuration
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `SUBSCRIPTION_ENGINE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `SUBSCRIPTION_ENGINE__BILLING__PERIOD_DAYS=30` -> `billing.period_days = 30`
    /// - `SUBSCRIPTION_ENGINE__GATEWAY__API_KEY=...` -> `gateway.api_key = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("SUBSCRIPTION_ENGINE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.billing.validate()?;
        self.gateway.validate()?;
        self.scheduler.validate()?;
        self.reconciliation.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn valid_gateway() -> GatewayConfig {
        GatewayConfig {
            base_url: "https://gateway.example.com".to_string(),
            api_key: SecretString::new("sk_test_abc".to_string()),
            webhook_secret: SecretString::new("whsec_xyz".to_string()),
            charge_timeout_secs: 30,
            max_attempts: 3,
            retry_delay_secs: 1,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        let config = AppConfig {
            billing: BillingConfig::default(),
            gateway: valid_gateway(),
            scheduler: SchedulerConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_section_fails_validation() {
        let mut config = AppConfig {
            billing: BillingConfig::default(),
            gateway: valid_gateway(),
            scheduler: SchedulerConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        };
        config.billing.period_days = 0;
        assert!(config.validate().is_err());
    }
}
