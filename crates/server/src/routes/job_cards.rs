//! Job-card API handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use partsflow_core::JobCardId;

use crate::db::job_cards::{JobCard, NewJobCard};
use crate::error::AppError;
use crate::middleware::RequireActor;
use crate::services::JobCardService;
use crate::state::AppState;

/// Build the job-card router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job-cards", post(create))
        .route("/job-cards/{id}", get(show))
}

/// Open a job card; responds with the allocated number.
async fn create(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Json(body): Json<NewJobCard>,
) -> Result<(StatusCode, Json<JobCard>), AppError> {
    actor.ensure_can_open_job_cards()?;
    let job_card = JobCardService::new(state.pool())
        .create(&body, &actor.id)
        .await?;
    Ok((StatusCode::CREATED, Json(job_card)))
}

async fn show(
    RequireActor(_actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<JobCardId>,
) -> Result<Json<JobCard>, AppError> {
    let job_card = JobCardService::new(state.pool()).get(id).await?;
    Ok(Json(job_card))
}
