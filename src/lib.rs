//! Subscription lifecycle engine.
//!
//! Drives a subscription from creation to termination: the lifecycle
//! state machine, the renewal/billing scheduler, an idempotent event
//! ledger, and a reconciliation driver that heals lost callbacks and
//! crash windows. Billing effects are exactly-once under at-least-once
//! delivery of gateway events.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
