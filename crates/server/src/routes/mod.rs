//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET   /health                         - Liveness
//! GET   /health/ready                   - Readiness (database reachable)
//!
//! # Parts issues
//! GET   /parts-issues                   - List (?status=&serviceCenterId=&jobCardId=&limit=&offset=)
//! POST  /parts-issues                   - Open a request
//! GET   /parts-issues/summary           - Bucket counts
//! GET   /parts-issues/{id}              - Request with projection
//! GET   /parts-issues/{id}/events       - Audit trail
//! PATCH /parts-issues/{id}/sc-approve   - Service-center approval
//! PATCH /parts-issues/{id}/sc-reject    - Service-center rejection
//! PATCH /parts-issues/{id}/admin-approve - Admin approval with quantities
//! PATCH /parts-issues/{id}/admin-reject - Admin rejection
//! PATCH /parts-issues/{id}/resend       - Resend for review
//! PATCH /parts-issues/{id}/dispatch     - Release stock
//! PATCH /parts-issues/{id}/complete     - Close a dispatched request
//!
//! # Job cards
//! POST  /job-cards                      - Open a job card
//! GET   /job-cards/{id}                 - Job card detail
//! ```
//!
//! Every route except the health checks requires the actor headers.

pub mod job_cards;
pub mod parts_issues;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(parts_issues::router())
        .merge(job_cards::router())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;

    /// Router over a pool that never connects; only paths that fail before
    /// touching the database can be exercised.
    fn app() -> Router {
        let config = ServerConfig::from_lookup(|key| {
            (key == "PARTSFLOW_DATABASE_URL").then(|| "postgres://localhost/partsflow".to_string())
        })
        .unwrap();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/partsflow")
            .unwrap();
        routes().with_state(AppState::new(config, pool))
    }

    async fn error_code(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        body["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_missing_actor_is_401() {
        let response = app()
            .oneshot(
                Request::get("/parts-issues")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "unauthorized");
    }

    #[tokio::test]
    async fn test_wrong_role_is_403() {
        let response = app()
            .oneshot(
                Request::patch("/parts-issues/1/admin-approve")
                    .header("content-type", "application/json")
                    .header("x-actor-id", "tech-7")
                    .header("x-actor-role", "technician")
                    .body(Body::from(r#"{"version":2,"items":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "forbidden");
    }

    #[tokio::test]
    async fn test_warehouse_cannot_open_job_cards() {
        let response = app()
            .oneshot(
                Request::post("/job-cards")
                    .header("content-type", "application/json")
                    .header("x-actor-id", "wh-1")
                    .header("x-actor-role", "warehouse")
                    .body(Body::from(r#"{"serviceCenterId":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_400() {
        let response = app()
            .oneshot(
                Request::get("/parts-issues?status=SHIPPED")
                    .header("x-actor-id", "mgr-1")
                    .header("x-actor-role", "service_manager")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "bad_request");
    }
}
