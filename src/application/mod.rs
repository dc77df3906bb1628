//! Application layer - command handlers wiring ports together.

pub mod handlers;

pub use handlers::{
    ApplyOutcome, CreateSubscriptionCommand, CreateSubscriptionHandler, EventApplier,
    FireDueTasksHandler, FireSummary, IngestEventHandler, IngestOutcome, ReconcileHandler,
    ReconcileSummary,
};
