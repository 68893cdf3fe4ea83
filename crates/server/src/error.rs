//! Unified error handling for the HTTP API.
//!
//! Every error renders as JSON `{ "error": "...", "code": "..." }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use partsflow_core::WorkflowError;
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// A workflow rule rejected the operation.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller did not identify itself.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller's role may not perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Workflow(err) => match err {
                WorkflowError::Validation(_) | WorkflowError::UnknownItem(_) => {
                    StatusCode::BAD_REQUEST
                }
                WorkflowError::InvalidState { .. } | WorkflowError::ConcurrencyConflict { .. } => {
                    StatusCode::CONFLICT
                }
                WorkflowError::QuantityExceeded { .. } | WorkflowError::InsufficientStock { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                WorkflowError::MissingSubPoNumber(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Workflow(err) => err.code(),
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => "not_found",
            Self::Database(RepositoryError::Conflict(_)) => "conflict",
            Self::Database(_) | Self::Internal(_) => "internal_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request failed"
            );
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        // Don't expose internal error details to clients
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error,
                code: self.code(),
            }),
        )
            .into_response()
    }
}

/// Set the Sentry user context from the acting staff member.
pub fn set_sentry_actor(actor_id: &str, role: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(actor_id.to_string()),
            ..Default::default()
        }));
        scope.set_tag("actor_role", role);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use partsflow_core::{PartId, PartsIssueItemId, PartsIssueStatus, WorkflowAction};

    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("parts issue 12".to_string());
        assert_eq!(err.to_string(), "Not found: parts issue 12");

        let err = AppError::Workflow(WorkflowError::validation("a reason is required"));
        assert_eq!(err.to_string(), "validation failed: a reason is required");
    }

    #[test]
    fn test_workflow_status_codes() {
        assert_eq!(
            get_status(WorkflowError::validation("bad").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(WorkflowError::UnknownItem(PartsIssueItemId::new(4)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(
                WorkflowError::InvalidState {
                    action: WorkflowAction::Dispatch,
                    status: PartsIssueStatus::PendingScApproval,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(
                WorkflowError::ConcurrencyConflict {
                    expected: 2,
                    actual: 3
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(
                WorkflowError::QuantityExceeded {
                    item_id: PartsIssueItemId::new(1),
                    requested: 7,
                    available: 6,
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(
                WorkflowError::InsufficientStock {
                    part_id: PartId::new(1),
                    requested: 7,
                    available: 6,
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Database(RepositoryError::NotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes_distinguish_conflicts() {
        let stale = AppError::from(WorkflowError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
        });
        let wrong_state = AppError::from(WorkflowError::InvalidState {
            action: WorkflowAction::Complete,
            status: PartsIssueStatus::AdminApproved,
        });
        assert_eq!(stale.code(), "concurrency_conflict");
        assert_eq!(wrong_state.code(), "invalid_state");
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = AppError::Database(RepositoryError::DataCorruption(
            "bad status in row 4".to_string(),
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal_error");
    }
}
