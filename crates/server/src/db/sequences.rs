//! Atomic per-scope document counters.
//!
//! One row per `(kind, location_code, year, month)`. Allocation is a single
//! upsert, so two transactions allocating in the same scope serialize on the
//! row lock and can never observe the same value. Run inside the caller's
//! transaction: a rolled-back document also rolls back its number.

use chrono::{DateTime, Utc};
use partsflow_core::{DocumentKind, DocumentNumber, SequenceScope};
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;

/// Allocate the next number in `scope`.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the upsert fails.
pub async fn allocate(
    conn: &mut PgConnection,
    scope: &SequenceScope,
) -> Result<DocumentNumber, RepositoryError> {
    let last_value: i32 = sqlx::query_scalar(
        r"
        INSERT INTO workshop.document_sequence (kind, location_code, year, month, last_value)
        VALUES ($1, $2, $3, $4, 1)
        ON CONFLICT (kind, location_code, year, month)
        DO UPDATE SET last_value = workshop.document_sequence.last_value + 1,
                      updated_at = NOW()
        RETURNING last_value
        ",
    )
    .bind(scope.kind().as_str())
    .bind(scope.location_code())
    .bind(scope.year())
    .bind(month_to_db(scope.month()))
    .fetch_one(&mut *conn)
    .await?;

    let sequence = u32::try_from(last_value).map_err(|_| {
        RepositoryError::DataCorruption(format!("negative sequence value {last_value}"))
    })?;
    tracing::debug!(kind = %scope.kind(), location = scope.location_code(), sequence, "Allocated document number");

    Ok(scope.number(sequence))
}

/// Raise a scope's counter to at least `last_value`. Never lowers it.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the upsert fails.
pub async fn raise_to(
    conn: &mut PgConnection,
    scope: &SequenceScope,
    last_value: u32,
) -> Result<u32, RepositoryError> {
    let value = i32::try_from(last_value).map_err(|_| {
        RepositoryError::Conflict(format!("sequence value {last_value} is out of range"))
    })?;

    let stored: i32 = sqlx::query_scalar(
        r"
        INSERT INTO workshop.document_sequence (kind, location_code, year, month, last_value)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (kind, location_code, year, month)
        DO UPDATE SET last_value = GREATEST(workshop.document_sequence.last_value, EXCLUDED.last_value),
                      updated_at = NOW()
        RETURNING last_value
        ",
    )
    .bind(scope.kind().as_str())
    .bind(scope.location_code())
    .bind(scope.year())
    .bind(month_to_db(scope.month()))
    .bind(value)
    .fetch_one(&mut *conn)
    .await?;

    Ok(u32::try_from(stored).unwrap_or_default())
}

/// A stored counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCounter {
    pub scope: SequenceScope,
    pub last_value: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SequenceRow {
    kind: String,
    location_code: String,
    year: i32,
    month: i32,
    last_value: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SequenceRow> for SequenceCounter {
    type Error = RepositoryError;

    fn try_from(row: SequenceRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<DocumentKind>()
            .map_err(RepositoryError::DataCorruption)?;
        let month = u32::try_from(row.month)
            .map_err(|_| RepositoryError::DataCorruption(format!("invalid month {}", row.month)))?;
        let scope = SequenceScope::new(kind, &row.location_code, row.year, month)
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;
        let last_value = u32::try_from(row.last_value).map_err(|_| {
            RepositoryError::DataCorruption(format!("invalid sequence value {}", row.last_value))
        })?;

        Ok(Self {
            scope,
            last_value,
            updated_at: row.updated_at,
        })
    }
}

/// List every counter, newest scopes first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails, or
/// `RepositoryError::DataCorruption` for an unreadable row.
pub async fn list(
    pool: &PgPool,
    kind: Option<DocumentKind>,
) -> Result<Vec<SequenceCounter>, RepositoryError> {
    let rows: Vec<SequenceRow> = sqlx::query_as(
        r"
        SELECT kind, location_code, year, month, last_value, updated_at
        FROM workshop.document_sequence
        WHERE $1::TEXT IS NULL OR kind = $1
        ORDER BY year DESC, month DESC, kind, location_code
        ",
    )
    .bind(kind.map(DocumentKind::as_str))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SequenceCounter::try_from).collect()
}

/// Every rendered number of `kind` currently stored, for reseeding.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn existing_numbers(
    pool: &PgPool,
    kind: DocumentKind,
) -> Result<Vec<String>, RepositoryError> {
    let query = match kind {
        DocumentKind::JobCard => "SELECT job_card_number FROM workshop.job_card",
        DocumentKind::PartsIssue => "SELECT issue_number FROM workshop.parts_issue",
        DocumentKind::SubPurchaseOrder => {
            "SELECT sub_po_number FROM workshop.parts_issue_item WHERE sub_po_number IS NOT NULL"
        }
    };

    let numbers: Vec<String> = sqlx::query_scalar(query).fetch_all(pool).await?;
    Ok(numbers)
}

fn month_to_db(month: u32) -> i32 {
    // Scopes only hold months 1..=12.
    i32::try_from(month).unwrap_or(1)
}
