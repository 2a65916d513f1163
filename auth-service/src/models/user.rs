//! User identities and their permission rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::otp::LoginIdentifier;
use super::permission::{PermissionKey, UserPermission};

/// User entity. Exactly one of `email`/`phone` is what the user signed up with;
/// the other may be attached later by profile management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user keyed by the identifier that was just proven via OTP.
    pub fn new(login: &LoginIdentifier) -> Self {
        let (email, phone) = match login {
            LoginIdentifier::Email(email) => (Some(email.clone()), None),
            LoginIdentifier::Phone(phone) => (None, Some(phone.clone())),
        };
        Self {
            id: Uuid::new_v4(),
            email,
            phone,
            created_at: Utc::now(),
        }
    }
}

/// `users` table row.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.user_id,
            email: row.email,
            phone: row.phone,
            created_at: row.created_utc,
        }
    }
}

/// One grant as read from `user_roles ⨝ roles`, or the owner grant of an
/// owned organization.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionRow {
    pub organization_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
    pub actions: Vec<String>,
}

impl From<PermissionRow> for UserPermission {
    fn from(row: PermissionRow) -> Self {
        let actions = row
            .actions
            .iter()
            .filter_map(|raw| match raw.parse::<PermissionKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unknown permission key from role row");
                    None
                }
            })
            .collect();
        UserPermission {
            organization_id: row.organization_id,
            school_id: row.school_id,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_takes_field_from_login_channel() {
        let user = User::new(&LoginIdentifier::Phone("+15551234567".to_string()));
        assert_eq!(user.phone.as_deref(), Some("+15551234567"));
        assert!(user.email.is_none());
    }

    #[test]
    fn permission_row_drops_unknown_keys() {
        let org = Uuid::new_v4();
        let grant = UserPermission::from(PermissionRow {
            organization_id: Some(org),
            school_id: None,
            actions: vec!["orgs:read".to_string(), "legacy:thing".to_string()],
        });
        assert_eq!(grant.organization_id, Some(org));
        assert_eq!(grant.actions, vec![PermissionKey::OrgsRead]);
    }
}
