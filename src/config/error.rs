//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Billing period length must be at least 1 day")]
    InvalidPeriodLength,

    #[error("Dunning retry maximum must be at least 1")]
    InvalidMaxRetries,

    #[error("Backoff base must be at least 1 second")]
    InvalidBackoffBase,

    #[error("Backoff cap must be >= backoff base")]
    InvalidBackoffCap,

    #[error("Grace period length must be at least 1 day")]
    InvalidGraceLength,

    #[error("Invalid gateway base URL format")]
    InvalidGatewayUrl,

    #[error("Invalid gateway API key format")]
    InvalidGatewayKey,

    #[error("Invalid gateway webhook secret format")]
    InvalidWebhookSecret,

    #[error("Gateway charge timeout must be at least 1 second")]
    InvalidChargeTimeout,

    #[error("Scheduler poll interval must be at least 1 second")]
    InvalidPollInterval,

    #[error("Scheduler batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Reconciliation cadence must be at least 1 second")]
    InvalidCadence,

    #[error("Reconciliation staleness threshold must be at least 1 second")]
    InvalidStalenessThreshold,

    #[error("Reconciliation status query maximum must be at least 1")]
    InvalidMaxStatusQueries,
}
