use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use crate::{
    models::{PermissionKey, SchoolPlacement, Scope},
    services::{AuthContext, ServiceError},
};

/// Route guard for actions that are not tied to one tenant, such as creating
/// an organization. Exported for the CRUD services that mount their routes on
/// this router; must run inside [`super::auth_middleware`].
///
/// ```ignore
/// .layer(from_fn(|req: Request, next: Next| {
///     require_permissions(&[PermissionKey::OrgsCreate], req, next)
/// }))
/// ```
pub async fn require_permissions(
    required: &'static [PermissionKey],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth context missing from request extensions"
        ))
    })?;

    if let Err(e) = context.permissions.check(required, None) {
        tracing::warn!(
            user_id = %context.user_id(),
            required = ?required,
            "Insufficient permissions"
        );
        return Err(e.into());
    }

    Ok(next.run(req).await)
}

/// Handler-side check for tenant-scoped actions.
pub fn authorize(
    context: &AuthContext,
    required: &[PermissionKey],
    scopes: &[Scope],
) -> Result<(), AppError> {
    context
        .permissions
        .check(required, Some(scopes))
        .map_err(|e: ServiceError| {
            tracing::warn!(
                user_id = %context.user_id(),
                required = ?required,
                "Insufficient permissions for scope"
            );
            AppError::from(e)
        })
}

/// Handler-side check for one school, placed by the repository.
pub fn authorize_school(
    context: &AuthContext,
    required: &[PermissionKey],
    placement: &SchoolPlacement,
) -> Result<(), AppError> {
    context
        .permissions
        .check_in_school(required, placement)
        .map_err(|e: ServiceError| {
            tracing::warn!(
                user_id = %context.user_id(),
                school_id = %placement.school_id(),
                required = ?required,
                "Insufficient permissions for school"
            );
            AppError::from(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserPermission;
    use crate::services::{Claims, Permissions, TokenUse};
    use axum::{body::Body, http::StatusCode, middleware::from_fn, routing::post, Router};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn context(grants: Vec<UserPermission>) -> AuthContext {
        AuthContext {
            claims: Claims {
                sub: Uuid::new_v4(),
                jti: Uuid::new_v4(),
                iat: 0,
                exp: 60,
                token_use: TokenUse::Access,
                permissions: None,
            },
            permissions: Permissions::new(grants),
        }
    }

    fn app(ctx: AuthContext) -> Router {
        Router::new()
            .route("/orgs", post(|| async { "created" }))
            .layer(from_fn(|req: Request, next: Next| {
                require_permissions(&[PermissionKey::OrgsCreate], req, next)
            }))
            .layer(axum::Extension(ctx))
    }

    async fn call(ctx: AuthContext) -> StatusCode {
        app(ctx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/orgs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn guard_rejects_missing_permission() {
        assert_eq!(call(context(vec![])).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn guard_passes_matching_grant() {
        let grant = UserPermission::owner(Uuid::new_v4());
        assert_eq!(call(context(vec![grant])).await, StatusCode::OK);
    }

    #[test]
    fn authorize_respects_scope() {
        let org = Uuid::new_v4();
        let ctx = context(vec![UserPermission::owner(org)]);
        assert!(authorize(&ctx, &[PermissionKey::SchoolsCreate], &[Scope::organization(org)]).is_ok());
        assert!(authorize(
            &ctx,
            &[PermissionKey::SchoolsCreate],
            &[Scope::organization(Uuid::new_v4())]
        )
        .is_err());
    }

    #[test]
    fn authorize_school_uses_stored_placement() {
        let org = Uuid::new_v4();
        let ctx = context(vec![UserPermission::owner(org)]);
        let own = SchoolPlacement::new(org, Uuid::new_v4());
        let foreign = SchoolPlacement::new(Uuid::new_v4(), Uuid::new_v4());

        assert!(authorize_school(&ctx, &[PermissionKey::SchoolsUpdate], &own).is_ok());
        let err = authorize_school(&ctx, &[PermissionKey::SchoolsUpdate], &foreign).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
