//! Subscription domain module.
//!
//! Owns the billing lifecycle: the aggregate, its status state machine,
//! the policy knobs, and the pure transition engine.
//!
//! # Module Structure
//!
//! - `aggregate` - Subscription aggregate entity
//! - `status` - SubscriptionStatus state machine
//! - `policy` - BillingPolicy configuration knobs
//! - `transition` - pure (state, event) -> (state, intents) engine

mod aggregate;
mod policy;
mod status;
mod transition;

pub use aggregate::Subscription;
pub use policy::{BillingPolicy, CancellationPolicy};
pub use status::SubscriptionStatus;
pub use transition::{
    apply_event, Disposition, EffectIntent, NoOpReason, NotifyKind, TransitionOutcome,
};
