//! PostgreSQL adapters.
//!
//! Implement the persistence ports on top of sqlx. The expected schema:
//!
//! - `subscriptions` - primary key `id`, integer `version` column for
//!   the optimistic check
//! - `ledger_events` - primary key `idempotency_key` (the uniqueness
//!   constraint that serializes duplicate delivery), JSONB `payload`
//! - `scheduled_tasks` - primary key `(subscription_id, kind)`, indexed
//!   by `fire_at` for the due-task range scan
//!
//! Schema migration tooling is an external collaborator.

mod event_ledger;
mod subscription_store;
mod task_store;

pub use event_ledger::PostgresEventLedger;
pub use subscription_store::PostgresSubscriptionStore;
pub use task_store::PostgresTaskStore;
