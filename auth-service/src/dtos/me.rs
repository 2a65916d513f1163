use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::{Scope, UserPermission};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: Uuid,
    pub permissions: Vec<UserPermission>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ScopesQuery {
    /// Comma separated permission keys, all of which must be granted.
    #[param(example = "orgs:read,schools:read")]
    pub actions: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScopesResponse {
    pub organizations: Vec<Uuid>,
    pub schools: Vec<Uuid>,
    pub scopes: Vec<Scope>,
}
