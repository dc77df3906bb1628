//! Command handlers.
//!
//! Every path into the engine converges on the shared [`EventApplier`]:
//! external ingestion, scheduler polls, and reconciliation sweeps.

mod create_subscription;
mod event_applier;
mod fire_due_tasks;
mod ingest_event;
mod reconcile;

pub use create_subscription::{CreateSubscriptionCommand, CreateSubscriptionHandler};
pub use event_applier::{ApplyOutcome, EventApplier};
pub use fire_due_tasks::{FireDueTasksHandler, FireSummary};
pub use ingest_event::{IngestEventHandler, IngestOutcome};
pub use reconcile::{ReconcileHandler, ReconcileSummary};
