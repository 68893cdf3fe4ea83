//! Job cards.

use chrono::{DateTime, Utc};
use partsflow_core::{JobCardId, ServiceCenterId};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use super::{RepositoryError, conflict_on_unique};

/// A job card that parts requests are raised against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCard {
    pub id: JobCardId,
    pub job_card_number: String,
    pub service_center_id: ServiceCenterId,
    pub vehicle_registration: Option<String>,
    pub customer_name: Option<String>,
    pub complaint: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Body of a create-job-card call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJobCard {
    pub service_center_id: ServiceCenterId,
    #[serde(default)]
    pub vehicle_registration: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub complaint: Option<String>,
    /// Accepted for compatibility and ignored: the number always uses the
    /// service center's own code.
    #[serde(default)]
    pub location_code: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct JobCardRow {
    id: i32,
    job_card_number: String,
    service_center_id: i32,
    vehicle_registration: Option<String>,
    customer_name: Option<String>,
    complaint: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl From<JobCardRow> for JobCard {
    fn from(row: JobCardRow) -> Self {
        Self {
            id: JobCardId::new(row.id),
            job_card_number: row.job_card_number,
            service_center_id: ServiceCenterId::new(row.service_center_id),
            vehicle_registration: row.vehicle_registration,
            customer_name: row.customer_name,
            complaint: row.complaint,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

const JOB_CARD_COLUMNS: &str = "id, job_card_number, service_center_id, vehicle_registration, \
     customer_name, complaint, created_by, created_at";

/// Repository for job-card reads.
pub struct JobCardRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> JobCardRepository<'a> {
    /// Create a new job-card repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a job card by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: JobCardId) -> Result<Option<JobCard>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }
}

/// Get a job card by ID on an existing connection.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get(conn: &mut PgConnection, id: JobCardId) -> Result<Option<JobCard>, RepositoryError> {
    let row: Option<JobCardRow> = sqlx::query_as(&format!(
        "SELECT {JOB_CARD_COLUMNS} FROM workshop.job_card WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Into::into))
}

/// Insert a job card under an already allocated number.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the number is already used.
pub async fn insert(
    conn: &mut PgConnection,
    job_card_number: &str,
    input: &NewJobCard,
    created_by: &str,
    created_at: DateTime<Utc>,
) -> Result<JobCard, RepositoryError> {
    let row: JobCardRow = sqlx::query_as(&format!(
        r"
        INSERT INTO workshop.job_card (
            job_card_number, service_center_id, vehicle_registration,
            customer_name, complaint, created_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {JOB_CARD_COLUMNS}
        "
    ))
    .bind(job_card_number)
    .bind(input.service_center_id)
    .bind(&input.vehicle_registration)
    .bind(&input.customer_name)
    .bind(&input.complaint)
    .bind(created_by)
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, "job card number"))?;

    Ok(row.into())
}
