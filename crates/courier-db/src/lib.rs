//! PostgreSQL persistence for the courier message dispatch service.
//!
//! Three tables back the service: `messages` (delivery state machine),
//! `dead_letter_messages` (append-only records of undeliverable messages)
//! and `audit_logs` (append-only lifecycle trail). All queries are
//! runtime-bound; schema migrations are embedded from `migrations/`.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::{connect, DbPoolOptions};
