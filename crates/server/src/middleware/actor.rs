//! Actor identification and role checks.
//!
//! Authentication happens upstream: the gateway sets `X-Actor-Id` and
//! `X-Actor-Role` on every request it forwards. Handlers take a
//! [`RequireActor`] and call [`Actor::ensure`] before mutating anything.

use axum::{extract::FromRequestParts, http::request::Parts};
use partsflow_core::{StaffRole, WorkflowAction};

use crate::error::{AppError, set_sentry_actor};

/// Header carrying the actor's identifier.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the actor's staff role.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The staff member performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: StaffRole,
}

impl Actor {
    /// Fail with `Forbidden` unless the role may perform `action`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Forbidden` if the role is not permitted.
    pub fn ensure(&self, action: WorkflowAction) -> Result<(), AppError> {
        if self.role.permits(action) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role {} may not {action}",
                self.role
            )))
        }
    }

    /// Fail with `Forbidden` unless the role may open job cards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Forbidden` if the role is not permitted.
    pub fn ensure_can_open_job_cards(&self) -> Result<(), AppError> {
        if self.role.can_open_job_cards() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role {} may not open job cards",
                self.role
            )))
        }
    }
}

/// Extractor that requires an identified actor.
///
/// Rejects with 401 when either header is missing, blank or unreadable, or
/// when the role is not a known staff role.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireActor(actor): RequireActor) -> Result<(), AppError> {
///     actor.ensure(WorkflowAction::Dispatch)?;
///     Ok(())
/// }
/// ```
pub struct RequireActor(pub Actor);

impl<S> FromRequestParts<S> for RequireActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, ACTOR_ID_HEADER)?;
        let role = header(parts, ACTOR_ROLE_HEADER)?
            .parse::<StaffRole>()
            .map_err(AppError::Unauthorized)?;

        set_sentry_actor(&id, &role.to_string());
        Ok(Self(Actor { id, role }))
    }
}

fn header(parts: &Parts, name: &str) -> Result<String, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{Request, StatusCode};

    use super::*;

    async fn extract(headers: &[(&str, &str)]) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/parts-issues");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        RequireActor::from_request_parts(&mut parts, &())
            .await
            .map(|RequireActor(actor)| actor)
    }

    #[tokio::test]
    async fn test_extracts_actor() {
        let actor = extract(&[("X-Actor-Id", " mgr-1 "), ("X-Actor-Role", "service_manager")])
            .await
            .unwrap();
        assert_eq!(actor.id, "mgr-1");
        assert_eq!(actor.role, StaffRole::ServiceManager);
    }

    #[tokio::test]
    async fn test_missing_headers_are_unauthorized() {
        let err = extract(&[("X-Actor-Role", "warehouse")]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = extract(&[("X-Actor-Id", "wh-1")]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = extract(&[("X-Actor-Id", "  "), ("X-Actor-Role", "warehouse")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_role_is_unauthorized() {
        let err = extract(&[("X-Actor-Id", "x"), ("X-Actor-Role", "customer")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_ensure_checks_role() {
        let warehouse = Actor {
            id: "wh-1".to_string(),
            role: StaffRole::Warehouse,
        };
        assert!(warehouse.ensure(WorkflowAction::Dispatch).is_ok());
        let err = warehouse.ensure(WorkflowAction::AdminApprove).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(warehouse.ensure_can_open_job_cards().is_err());

        let technician = Actor {
            id: "tech-7".to_string(),
            role: StaffRole::Technician,
        };
        assert!(technician.ensure(WorkflowAction::Create).is_ok());
        assert!(technician.ensure_can_open_job_cards().is_ok());
        assert!(technician.ensure(WorkflowAction::ScApprove).is_err());
    }
}
