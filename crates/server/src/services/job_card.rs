//! Job-card service.

use chrono::Utc;
use partsflow_core::{DocumentKind, JobCardId, SequenceScope};
use sqlx::PgPool;
use tracing::instrument;

use crate::db::job_cards::{self, JobCard, NewJobCard};
use crate::db::{JobCardRepository, catalog, sequences};
use crate::error::AppError;

/// Job-card service.
pub struct JobCardService<'a> {
    pool: &'a PgPool,
}

impl<'a> JobCardService<'a> {
    /// Create a new job-card service.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a job card by ID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the job card does not exist.
    pub async fn get(&self, id: JobCardId) -> Result<JobCard, AppError> {
        JobCardRepository::new(self.pool)
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job card {id}")))
    }

    /// Open a job card with the next number of its service center.
    ///
    /// The number is always scoped to the service center's stored code; a
    /// `locationCode` sent by the client plays no part.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown service center.
    #[instrument(skip(self, input), fields(service_center_id = %input.service_center_id))]
    pub async fn create(&self, input: &NewJobCard, actor: &str) -> Result<JobCard, AppError> {
        if let Some(claimed) = input.location_code.as_deref() {
            tracing::debug!(claimed, "Ignoring client-supplied location code");
        }

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.into()))?;

        let service_center = catalog::service_center(&mut tx, input.service_center_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("service center {}", input.service_center_id))
            })?;

        let scope = SequenceScope::at(DocumentKind::JobCard, &service_center.code, now)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let number = sequences::allocate(&mut tx, &scope).await?;

        let job_card = job_cards::insert(&mut tx, &number.to_string(), input, actor, now).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.into()))?;

        tracing::info!(
            job_card_id = %job_card.id,
            job_card_number = %job_card.job_card_number,
            actor,
            "Job card opened"
        );
        Ok(job_card)
    }
}
