//! Gateway webhook module.
//!
//! Signature verification and parsing for gateway callbacks. The ingress
//! collaborator verifies a raw delivery here, then hands the resulting
//! ledger event to [`crate::application::IngestEventHandler`].

mod callback;
mod errors;
mod verifier;

pub use callback::{GatewayCallback, GatewayCallbackData};
pub use errors::WebhookError;
pub use verifier::{SignatureHeader, WebhookVerifier};
