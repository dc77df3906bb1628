//! Payment gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

fn default_charge_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    1
}

/// Payment gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway API base URL
    pub base_url: String,

    /// Gateway API key
    pub api_key: SecretString,

    /// Gateway webhook signing secret
    pub webhook_secret: SecretString,

    /// Bound on a single charge call; exceeding it is an ambiguous
    /// outcome for reconciliation, not a failure
    #[serde(default = "default_charge_timeout_secs")]
    pub charge_timeout_secs: u64,

    /// Attempts per call for transiently failing requests
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between transient-failure retries, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl GatewayConfig {
    /// Check if using gateway test mode
    pub fn is_test_mode(&self) -> bool {
        self.api_key.expose_secret().starts_with("sk_test_")
    }

    /// Validate gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_url.is_empty() {
            return Err(ValidationError::MissingRequired("GATEWAY_BASE_URL"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidGatewayUrl);
        }
        if self.api_key.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("GATEWAY_API_KEY"));
        }
        if self.webhook_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("GATEWAY_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !self.api_key.expose_secret().starts_with("sk_") {
            return Err(ValidationError::InvalidGatewayKey);
        }
        if !self.webhook_secret.expose_secret().starts_with("whsec_") {
            return Err(ValidationError::InvalidWebhookSecret);
        }
        if self.charge_timeout_secs == 0 {
            return Err(ValidationError::InvalidChargeTimeout);
        }

        Ok(())
    }
}
