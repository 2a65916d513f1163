use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    dtos::me::{MeResponse, ScopesQuery, ScopesResponse},
    dtos::ErrorResponse,
    middleware::{authorize, authorize_school, AuthUser},
    models::{PermissionKey, Scope},
    services::ServiceError,
    AppState,
};

fn required_actions(raw: &str) -> Result<Vec<PermissionKey>, AppError> {
    let keys = PermissionKey::parse_list(raw).map_err(AppError::InvalidFields)?;
    if keys.is_empty() {
        return Err(AppError::InvalidFields(vec![
            "actions: at least one permission key is required".to_string(),
        ]));
    }
    Ok(keys)
}

/// Current user and the grants this request was authorized with
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_me(AuthUser(ctx): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: ctx.user_id(),
        permissions: ctx.permissions.grants().to_vec(),
    })
}

/// Organizations, schools and scopes where the caller holds every listed action
#[utoipa::path(
    get,
    path = "/auth/me/scopes",
    params(ScopesQuery),
    responses(
        (status = 200, description = "Permitted tenants", body = ScopesResponse),
        (status = 400, description = "Unknown permission key", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_scopes(
    AuthUser(ctx): AuthUser,
    Query(query): Query<ScopesQuery>,
) -> Result<Json<ScopesResponse>, AppError> {
    let required = required_actions(&query.actions)?;
    let permissions = &ctx.permissions;

    Ok(Json(ScopesResponse {
        organizations: permissions.get_permitted_organizations(&required),
        schools: permissions.get_permitted_schools(&required),
        scopes: permissions.get_scopes(&required),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    /// Comma separated permission keys, all of which must be granted.
    #[param(example = "schools:update")]
    pub actions: String,
    pub organization_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckResponse {
    pub allowed: bool,
}

/// Check whether the caller may perform actions, optionally inside one tenant
#[utoipa::path(
    get,
    path = "/auth/me/permissions/check",
    params(CheckQuery),
    responses(
        (status = 200, description = "Allowed", body = CheckResponse),
        (status = 400, description = "Unknown permission key", body = ErrorResponse),
        (status = 403, description = "User does not have permission", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn check_permission(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, AppError> {
    let required = required_actions(&query.actions)?;

    match (query.organization_id, query.school_id) {
        (_, Some(school_id)) => {
            // The school's organization comes from storage, never from the query.
            let placement = state
                .users
                .find_school(school_id)
                .await?
                .filter(|p| query.organization_id.map_or(true, |org| org == p.organization_id()))
                .ok_or_else(|| {
                    tracing::warn!(user_id = %ctx.user_id(), school_id = %school_id, "Unknown school or organization mismatch");
                    AppError::from(ServiceError::Forbidden)
                })?;
            authorize_school(&ctx, &required, &placement)?;
        }
        (Some(org), None) => authorize(&ctx, &required, &[Scope::organization(org)])?,
        (None, None) => ctx.permissions.check(&required, None)?,
    }

    Ok(Json(CheckResponse { allowed: true }))
}
