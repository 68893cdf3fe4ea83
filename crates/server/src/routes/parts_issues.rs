//! Parts-issue API handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use partsflow_core::{
    BucketCounts, ItemApproval, JobCardId, NewPartsIssue, PartsIssueId, PartsIssueRequest,
    PartsIssueStatus, ServiceCenterId, StatusProjection, WorkflowAction, project,
};
use serde::{Deserialize, Serialize};

use crate::db::parts_issue::{PartsIssueEvent, PartsIssueFilter};
use crate::error::AppError;
use crate::middleware::RequireActor;
use crate::services::{DispatchInput, PartsIssueService};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// Build the parts-issue router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/parts-issues", get(list).post(create))
        .route("/parts-issues/summary", get(summary))
        .route("/parts-issues/{id}", get(show))
        .route("/parts-issues/{id}/events", get(events))
        .route("/parts-issues/{id}/sc-approve", patch(sc_approve))
        .route("/parts-issues/{id}/sc-reject", patch(sc_reject))
        .route("/parts-issues/{id}/admin-approve", patch(admin_approve))
        .route("/parts-issues/{id}/admin-reject", patch(admin_reject))
        .route("/parts-issues/{id}/resend", patch(resend))
        .route("/parts-issues/{id}/dispatch", patch(dispatch))
        .route("/parts-issues/{id}/complete", patch(complete))
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// A request together with its derived status.
#[derive(Debug, Serialize)]
pub struct PartsIssueView {
    #[serde(flatten)]
    pub request: PartsIssueRequest,
    pub projection: StatusProjection,
}

impl From<PartsIssueRequest> for PartsIssueView {
    fn from(request: PartsIssueRequest) -> Self {
        let projection = project(&request);
        Self {
            request,
            projection,
        }
    }
}

/// Query parameters of the list and summary endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub service_center_id: Option<ServiceCenterId>,
    pub job_card_id: Option<JobCardId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    fn filter(self) -> Result<PartsIssueFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_uppercase().parse::<PartsIssueStatus>())
            .transpose()
            .map_err(AppError::BadRequest)?;

        Ok(PartsIssueFilter {
            status,
            service_center_id: self.service_center_id,
            job_card_id: self.job_card_id,
            limit: Some(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)),
            offset: Some(self.offset.unwrap_or(0).max(0)),
        })
    }
}

/// Body carrying only the version the caller read.
#[derive(Debug, Deserialize)]
pub struct VersionBody {
    pub version: i32,
}

/// Body of a rejection.
#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub version: i32,
    pub reason: String,
}

/// Body of an admin approval. Lines not listed keep their quantity.
#[derive(Debug, Deserialize)]
pub struct AdminApproveBody {
    pub version: i32,
    #[serde(default)]
    pub items: Vec<ItemApproval>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List requests.
async fn list(
    RequireActor(_actor): RequireActor,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PartsIssueView>>, AppError> {
    let filter = query.filter()?;
    let requests = PartsIssueService::new(state.pool(), state.config())
        .list(&filter)
        .await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

/// Bucket counts for dashboards.
async fn summary(
    RequireActor(_actor): RequireActor,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BucketCounts>, AppError> {
    let filter = query.filter()?;
    let counts = PartsIssueService::new(state.pool(), state.config())
        .summary(&filter)
        .await?;
    Ok(Json(counts))
}

/// Open a request.
async fn create(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Json(body): Json<NewPartsIssue>,
) -> Result<(StatusCode, Json<PartsIssueView>), AppError> {
    actor.ensure(WorkflowAction::Create)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .create(&body, &actor.id)
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn show(
    RequireActor(_actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
) -> Result<Json<PartsIssueView>, AppError> {
    let request = PartsIssueService::new(state.pool(), state.config())
        .get(id)
        .await?;
    Ok(Json(request.into()))
}

async fn events(
    RequireActor(_actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
) -> Result<Json<Vec<PartsIssueEvent>>, AppError> {
    let events = PartsIssueService::new(state.pool(), state.config())
        .events(id)
        .await?;
    Ok(Json(events))
}

async fn sc_approve(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<VersionBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::ScApprove)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .sc_approve(id, body.version, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn sc_reject(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<RejectBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::ScReject)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .sc_reject(id, body.version, &body.reason, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn admin_approve(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<AdminApproveBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::AdminApprove)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .admin_approve(id, body.version, &body.items, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn admin_reject(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<RejectBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::AdminReject)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .admin_reject(id, body.version, &body.reason, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn resend(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<VersionBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::Resend)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .resend(id, body.version, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn dispatch(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<DispatchInput>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::Dispatch)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .dispatch(id, body, &actor.id)
        .await?;
    Ok(Json(request.into()))
}

async fn complete(
    RequireActor(actor): RequireActor,
    State(state): State<AppState>,
    Path(id): Path<PartsIssueId>,
    Json(body): Json<VersionBody>,
) -> Result<Json<PartsIssueView>, AppError> {
    actor.ensure(WorkflowAction::Complete)?;
    let request = PartsIssueService::new(state.pool(), state.config())
        .complete(id, body.version, &actor.id)
        .await?;
    Ok(Json(request.into()))
}
