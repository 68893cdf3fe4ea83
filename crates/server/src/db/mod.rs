//! Database operations for the `workshop` schema.
//!
//! ## Tables
//!
//! - `service_center` - Service-center directory (code used in document numbers)
//! - `part` / `part_stock` - Parts catalog and on-hand quantities
//! - `job_card` - Job cards that parts requests are raised against
//! - `document_sequence` - Per-scope counters behind every document number
//! - `parts_issue` / `parts_issue_item` - The parts-issue aggregate
//! - `parts_issue_event` - Audit trail of transitions
//! - `parts_issue_dispatch` - Idempotency keys of applied dispatches
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p partsflow-cli -- migrate
//! ```
//!
//! Reads go through the repository structs, which borrow the pool. Writes
//! that belong to a workflow operation take a `&mut PgConnection` so the
//! caller can run them inside one transaction.

pub mod catalog;
pub mod job_cards;
pub mod parts_issue;
pub mod sequences;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use catalog::CatalogRepository;
pub use job_cards::JobCardRepository;
pub use parts_issue::PartsIssueRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate document number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(
    database_url: &SecretString,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(max_connections.min(2))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique violation to `Conflict`, anything else to `Database`.
pub(crate) fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}
