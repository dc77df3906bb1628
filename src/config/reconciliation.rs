//! Reconciliation driver configuration

use serde::Deserialize;

use super::error::ValidationError;

fn default_cadence_secs() -> u64 {
    5 * 60
}

fn default_staleness_threshold_secs() -> u64 {
    10 * 60
}

fn default_charge_ambiguity_secs() -> u64 {
    5 * 60
}

fn default_max_status_queries() -> u32 {
    3
}

/// Reconciliation driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Sweep cadence, independent of per-subscription scheduling, in
    /// seconds
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,

    /// Age past which an unprocessed ledger event counts as stuck, in
    /// seconds
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,

    /// Window after a charge request without an outcome before the
    /// charge is treated as ambiguous, in seconds
    #[serde(default = "default_charge_ambiguity_secs")]
    pub charge_ambiguity_secs: u64,

    /// Status queries attempted per ambiguous charge per sweep
    #[serde(default = "default_max_status_queries")]
    pub max_status_queries: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            charge_ambiguity_secs: default_charge_ambiguity_secs(),
            max_status_queries: default_max_status_queries(),
        }
    }
}

impl ReconciliationConfig {
    /// Validate reconciliation configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cadence_secs == 0 {
            return Err(ValidationError::InvalidCadence);
        }
        if self.staleness_threshold_secs == 0 || self.charge_ambiguity_secs == 0 {
            return Err(ValidationError::InvalidStalenessThreshold);
        }
        if self.max_status_queries == 0 {
            return Err(ValidationError::InvalidMaxStatusQueries);
        }
        Ok(())
    }
}
