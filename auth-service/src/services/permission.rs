//! Scope-aware permission checks over a user's grants.
//!
//! A grant satisfies a request when it carries every required action (the
//! wildcard counts for any action) and, if the caller names scopes, covers at
//! least one of them. See [`UserPermission::covers`] for scope matching.
//!
//! Checks against one school go through [`Permissions::has_in_school`] with a
//! [`SchoolPlacement`] loaded from the repository, which is how an
//! organization-wide grant reaches the schools of its organization.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{PermissionKey, SchoolPlacement, Scope, UserPermission};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    grants: Vec<UserPermission>,
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

impl Permissions {
    pub fn new(grants: Vec<UserPermission>) -> Self {
        Self { grants }
    }

    pub fn grants(&self) -> &[UserPermission] {
        &self.grants
    }

    fn satisfying<'a>(
        &'a self,
        required: &'a [PermissionKey],
    ) -> impl Iterator<Item = &'a UserPermission> + 'a {
        self.grants.iter().filter(move |g| g.allows_all(required))
    }

    /// AND across `required`, OR across `scopes`.
    pub fn has(&self, required: &[PermissionKey], scopes: Option<&[Scope]>) -> bool {
        self.satisfying(required).any(|grant| match scopes {
            None => true,
            Some(scopes) => scopes.iter().any(|scope| grant.covers(scope)),
        })
    }

    pub fn check(
        &self,
        required: &[PermissionKey],
        scopes: Option<&[Scope]>,
    ) -> Result<(), ServiceError> {
        if self.has(required, scopes) {
            Ok(())
        } else {
            tracing::debug!(required = ?required, scopes = ?scopes, "Permission denied");
            Err(ServiceError::Forbidden)
        }
    }

    pub fn has_in_school(&self, required: &[PermissionKey], placement: &SchoolPlacement) -> bool {
        self.satisfying(required)
            .any(|grant| grant.covers_school(placement))
    }

    pub fn check_in_school(
        &self,
        required: &[PermissionKey],
        placement: &SchoolPlacement,
    ) -> Result<(), ServiceError> {
        if self.has_in_school(required, placement) {
            Ok(())
        } else {
            tracing::debug!(required = ?required, school_id = %placement.school_id(), "Permission denied");
            Err(ServiceError::Forbidden)
        }
    }

    pub fn get_scopes(&self, required: &[PermissionKey]) -> Vec<Scope> {
        let mut scopes = Vec::new();
        for grant in self.satisfying(required) {
            push_unique(&mut scopes, grant.scope());
        }
        scopes
    }

    pub fn get_permitted_organizations(&self, required: &[PermissionKey]) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for id in self.satisfying(required).filter_map(|g| g.organization_id) {
            push_unique(&mut ids, id);
        }
        ids
    }

    pub fn get_permitted_schools(&self, required: &[PermissionKey]) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for id in self.satisfying(required).filter_map(|g| g.school_id) {
            push_unique(&mut ids, id);
        }
        ids
    }

    /// Row filter for repositories listing tenant-owned records.
    pub fn scope_filter(&self, required: &[PermissionKey]) -> ScopeFilter {
        let mut filter = ScopeFilter::default();
        for grant in self.satisfying(required) {
            match (grant.organization_id, grant.school_id) {
                (_, Some(school)) => push_unique(&mut filter.school_ids, school),
                (Some(org), None) => push_unique(&mut filter.organization_ids, org),
                (None, None) => {}
            }
        }
        filter
    }
}

/// Reject keys that may not be put on a role. Exported for role management,
/// which calls it before persisting a role's key list.
pub fn ensure_assignable(keys: &[PermissionKey]) -> Result<(), ServiceError> {
    let errors: Vec<String> = keys
        .iter()
        .filter(|key| !key.is_assignable())
        .map(|key| format!("actions: `{}` cannot be assigned to a role", key))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}

/// Tenant ids a caller may see, plus optional client-side narrowing.
///
/// Exported for the CRUD layer: listing queries over tenant-owned tables
/// (`schools`, `courses`, ...) append this to their `WHERE` clause.
///
/// Rows match when their `organization_id` is a permitted organization or
/// their `school_id` is a permitted school, and they fall inside every
/// restriction that was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub organization_ids: Vec<Uuid>,
    pub school_ids: Vec<Uuid>,
    only_organizations: Option<Vec<Uuid>>,
    only_schools: Option<Vec<Uuid>>,
}

fn intersect(current: Option<Vec<Uuid>>, requested: &[Uuid]) -> Vec<Uuid> {
    let mut out = Vec::new();
    for id in requested {
        if current.as_ref().map_or(true, |c| c.contains(id)) {
            push_unique(&mut out, *id);
        }
    }
    out
}

impl ScopeFilter {
    pub fn restrict_organizations(mut self, requested: &[Uuid]) -> Self {
        self.organization_ids.retain(|id| requested.contains(id));
        self.only_organizations = Some(intersect(self.only_organizations.take(), requested));
        self
    }

    pub fn restrict_schools(mut self, requested: &[Uuid]) -> Self {
        self.school_ids.retain(|id| requested.contains(id));
        self.only_schools = Some(intersect(self.only_schools.take(), requested));
        self
    }

    /// True when no row can match.
    pub fn is_empty(&self) -> bool {
        (self.organization_ids.is_empty() && self.school_ids.is_empty())
            || self.only_organizations.as_ref().is_some_and(Vec::is_empty)
            || self.only_schools.as_ref().is_some_and(Vec::is_empty)
    }

    /// Append the predicate to a `WHERE` clause under construction.
    pub fn push_predicate(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        if self.is_empty() {
            builder.push("FALSE");
            return;
        }

        builder.push("(");
        match (self.organization_ids.is_empty(), self.school_ids.is_empty()) {
            (false, false) => {
                builder.push("organization_id = ANY(");
                builder.push_bind(self.organization_ids.clone());
                builder.push(") OR school_id = ANY(");
                builder.push_bind(self.school_ids.clone());
                builder.push(")");
            }
            (false, true) => {
                builder.push("organization_id = ANY(");
                builder.push_bind(self.organization_ids.clone());
                builder.push(")");
            }
            _ => {
                builder.push("school_id = ANY(");
                builder.push_bind(self.school_ids.clone());
                builder.push(")");
            }
        }
        builder.push(")");

        if let Some(orgs) = &self.only_organizations {
            builder.push(" AND organization_id = ANY(");
            builder.push_bind(orgs.clone());
            builder.push(")");
        }
        if let Some(schools) = &self.only_schools {
            builder.push(" AND school_id = ANY(");
            builder.push_bind(schools.clone());
            builder.push(")");
        }
    }
}
