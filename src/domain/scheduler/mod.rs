//! Renewal scheduler domain module.
//!
//! Durable task entities with generation-checked supersession, and the
//! jittered exponential backoff used for dunning retries.

mod backoff;
mod task;

pub use backoff::DunningBackoff;
pub use task::{ScheduledTask, TaskKind};
