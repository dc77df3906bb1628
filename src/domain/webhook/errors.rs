//! Webhook processing errors.

use thiserror::Error;

/// Errors from verifying and parsing a gateway webhook callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Signature verification failed.
    #[error("Webhook signature verification failed")]
    InvalidSignature,

    /// Event is older than the acceptance window.
    #[error("Webhook timestamp is outside the acceptance window")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Webhook timestamp is in the future")]
    InvalidTimestamp,

    /// Header or payload could not be parsed.
    #[error("Failed to parse webhook: {0}")]
    ParseError(String),

    /// The callback refers to an event type the engine does not consume.
    #[error("Unsupported webhook event type: {0}")]
    UnsupportedEventType(String),
}
