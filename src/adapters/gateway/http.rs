//! HTTP payment gateway adapter.
//!
//! Implements the `PaymentGateway` trait over the gateway's REST API.
//! Transiently failing calls (connection errors, rate limits) are retried
//! up to a configured number of attempts with a fixed delay; anything
//! still failing after that surfaces as a retryable `GatewayError` and is
//! left to the scheduler/reconciliation layers.
//!
//! # Idempotency
//!
//! Every request carries the billing cycle id as its idempotency key, so
//! retries here can never double-charge.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::domain::foundation::{CycleId, SubscriptionId};
use crate::ports::{ChargeOutcome, GatewayError, GatewayErrorCode, PaymentGateway};

/// HTTP gateway client.
pub struct HttpPaymentGateway {
    http_client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    max_attempts: u32,
    retry_delay: Duration,
}

/// Gateway charge resource as returned by the API.
#[derive(Debug, Deserialize)]
struct ChargeResource {
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl ChargeResource {
    fn into_outcome(self) -> Result<ChargeOutcome, GatewayError> {
        match self.status.as_str() {
            "succeeded" => Ok(ChargeOutcome::Succeeded),
            "failed" => Ok(ChargeOutcome::Failed {
                reason: self
                    .failure_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
            }),
            "pending" | "processing" => Ok(ChargeOutcome::Pending),
            other => Err(GatewayError::new(
                GatewayErrorCode::ProviderError,
                format!("Unknown charge status: {}", other),
            )),
        }
    }
}

impl HttpPaymentGateway {
    /// Create a client from validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Run one request builder with bounded retries on transient errors.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        && attempt < self.max_attempts
                    {
                        tracing::warn!(attempt, "Gateway rate limited; retrying");
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %err, "Gateway call failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(GatewayError::network(format!(
                        "Gateway unreachable after {} attempts: {}",
                        attempt, err
                    )));
                }
            }
        }
    }

    /// Map a non-success response to a gateway error.
    async fn error_from_response(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            reqwest::StatusCode::NOT_FOUND => GatewayError::not_found("charge"),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                GatewayError::authentication(format!("Gateway rejected credentials: {}", body))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                GatewayError::new(GatewayErrorCode::RateLimited, "Gateway rate limited")
            }
            _ => GatewayError::new(
                GatewayErrorCode::ProviderError,
                format!("Gateway API error ({}): {}", status, body),
            ),
        }
    }

    async fn parse_charge(response: reqwest::Response) -> Result<ChargeOutcome, GatewayError> {
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let resource: ChargeResource = response.json().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorCode::ProviderError,
                format!("Failed to parse gateway response: {}", e),
            )
        })?;
        resource.into_outcome()
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(
        &self,
        subscription_id: &SubscriptionId,
        cycle_id: &CycleId,
    ) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v1/charges", self.base_url);
        let params = [
            ("subscription_id", subscription_id.to_string()),
            ("cycle_id", cycle_id.to_string()),
        ];

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .post(&url)
                    .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
                    .header("Idempotency-Key", cycle_id.to_string())
                    .form(&params)
            })
            .await?;

        Self::parse_charge(response).await
    }

    async fn query_status(&self, cycle_id: &CycleId) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v1/charges/{}", self.base_url, cycle_id);

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .get(&url)
                    .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
            })
            .await?;

        Self::parse_charge(response).await
    }

    async fn refund(
        &self,
        subscription_id: &SubscriptionId,
        cycle_id: &CycleId,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/v1/refunds", self.base_url);
        let params = [
            ("subscription_id", subscription_id.to_string()),
            ("cycle_id", cycle_id.to_string()),
        ];

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .post(&url)
                    .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
                    .header("Idempotency-Key", cycle_id.to_string())
                    .form(&params)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}
