//! Permission vocabulary and tenant-scoped grants.
//!
//! The vocabulary is closed: every key a client, a token or a database row
//! hands us is parsed into [`PermissionKey`] and anything unknown is rejected
//! at that boundary.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

macro_rules! permission_keys {
    ($($variant:ident => $key:literal),+ $(,)?) => {
        /// A `resource:action` permission, or the owner wildcard `*`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PermissionKey {
            $($variant),+
        }

        impl PermissionKey {
            pub const ALL: &'static [PermissionKey] = &[$(PermissionKey::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(PermissionKey::$variant => $key),+
                }
            }
        }

        impl FromStr for PermissionKey {
            type Err = UnknownPermission;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($key => Ok(PermissionKey::$variant),)+
                    other => Err(UnknownPermission(other.to_string())),
                }
            }
        }
    };
}

permission_keys! {
    Wildcard => "*",
    OrgsCreate => "orgs:create",
    OrgsRead => "orgs:read",
    OrgsUpdate => "orgs:update",
    OrgsDelete => "orgs:delete",
    SchoolsCreate => "schools:create",
    SchoolsRead => "schools:read",
    SchoolsUpdate => "schools:update",
    SchoolsDelete => "schools:delete",
    CoursesCreate => "courses:create",
    CoursesRead => "courses:read",
    CoursesUpdate => "courses:update",
    CoursesDelete => "courses:delete",
    UsersCreate => "users:create",
    UsersRead => "users:read",
    UsersUpdate => "users:update",
    UsersDelete => "users:delete",
    RolesCreate => "roles:create",
    RolesRead => "roles:read",
    RolesUpdate => "roles:update",
    RolesDelete => "roles:delete",
}

impl PermissionKey {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, PermissionKey::Wildcard)
    }

    /// Whether the key may be put on a role. The wildcard belongs to the
    /// implicit owner grant only.
    pub fn is_assignable(&self) -> bool {
        !self.is_wildcard()
    }

    /// Parse a comma separated list such as `orgs:read,schools:read`,
    /// collecting one message per unknown entry.
    pub fn parse_list(raw: &str) -> Result<Vec<PermissionKey>, Vec<String>> {
        let mut keys = Vec::new();
        let mut errors = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.parse::<PermissionKey>() {
                Ok(key) => keys.push(key),
                Err(e) => errors.push(format!("actions: {}", e)),
            }
        }
        if errors.is_empty() {
            Ok(keys)
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermission(pub String);

impl fmt::Display for UnknownPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission `{}`", self.0)
    }
}

impl std::error::Error for UnknownPermission {}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Where a grant applies: an organization, a school, or a school inside an
/// organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<Uuid>,
}

impl Scope {
    pub fn organization(organization_id: Uuid) -> Self {
        Self {
            organization_id: Some(organization_id),
            school_id: None,
        }
    }

    pub fn school(school_id: Uuid) -> Self {
        Self {
            organization_id: None,
            school_id: Some(school_id),
        }
    }

    pub fn school_in(organization_id: Uuid, school_id: Uuid) -> Self {
        Self {
            organization_id: Some(organization_id),
            school_id: Some(school_id),
        }
    }
}

/// One grant: a scope plus the actions allowed inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<Uuid>,
    #[serde(default)]
    #[schema(value_type = Vec<String>, example = json!(["orgs:read", "schools:update"]))]
    pub actions: Vec<PermissionKey>,
}

impl UserPermission {
    pub fn new(scope: Scope, actions: Vec<PermissionKey>) -> Self {
        Self {
            organization_id: scope.organization_id,
            school_id: scope.school_id,
            actions,
        }
    }

    /// The implicit grant every organization owner receives.
    pub fn owner(organization_id: Uuid) -> Self {
        Self::new(
            Scope::organization(organization_id),
            vec![PermissionKey::Wildcard],
        )
    }

    pub fn scope(&self) -> Scope {
        Scope {
            organization_id: self.organization_id,
            school_id: self.school_id,
        }
    }

    /// A wildcard entry stands for every action.
    pub fn allows(&self, action: PermissionKey) -> bool {
        self.actions
            .iter()
            .any(|granted| granted.is_wildcard() || *granted == action)
    }

    /// Every required action must be present. A grant without actions never
    /// satisfies anything.
    pub fn allows_all(&self, required: &[PermissionKey]) -> bool {
        !self.actions.is_empty() && required.iter().all(|action| self.allows(*action))
    }

    /// Compare only the ids the caller asked about, each for equality. An
    /// empty scope asks for nothing and matches no grant; unscoped checks
    /// pass no scopes at all.
    pub fn covers(&self, requested: &Scope) -> bool {
        if requested.organization_id.is_none() && requested.school_id.is_none() {
            return false;
        }

        if let Some(org) = requested.organization_id {
            if self.organization_id != Some(org) {
                return false;
            }
        }

        if let Some(school) = requested.school_id {
            if self.school_id != Some(school) {
                return false;
            }
        }

        true
    }

    /// School grants match on the school. An organization-wide grant reaches
    /// a school only through its stored placement.
    pub fn covers_school(&self, placement: &SchoolPlacement) -> bool {
        match (self.organization_id, self.school_id) {
            (org, Some(school)) => {
                school == placement.school_id
                    && org.map_or(true, |org| org == placement.organization_id)
            }
            (Some(org), None) => org == placement.organization_id,
            (None, None) => false,
        }
    }
}

/// A school and the organization it is stored under. Only repositories build
/// one, so the pairing never comes from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchoolPlacement {
    organization_id: Uuid,
    school_id: Uuid,
}

impl SchoolPlacement {
    pub(crate) fn new(organization_id: Uuid, school_id: Uuid) -> Self {
        Self {
            organization_id,
            school_id,
        }
    }

    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    pub fn school_id(&self) -> Uuid {
        self.school_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_strings() {
        for key in PermissionKey::ALL {
            assert_eq!(key.as_str().parse::<PermissionKey>().unwrap(), *key);
        }
    }

    #[test]
    fn unknown_keys_are_rejected_by_serde() {
        let err = serde_json::from_str::<PermissionKey>("\"orgs:fly\"").unwrap_err();
        assert!(err.to_string().contains("unknown permission `orgs:fly`"));
    }

    #[test]
    fn parse_list_itemizes_unknown_entries() {
        let keys = PermissionKey::parse_list("orgs:read, schools:read").unwrap();
        assert_eq!(keys, vec![PermissionKey::OrgsRead, PermissionKey::SchoolsRead]);

        let errors = PermissionKey::parse_list("orgs:read,nope,also:nope").unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn wildcard_is_not_assignable() {
        assert!(!PermissionKey::Wildcard.is_assignable());
        assert!(PermissionKey::RolesUpdate.is_assignable());
    }

    #[test]
    fn grant_serializes_in_camel_case() {
        let org = Uuid::new_v4();
        let grant = UserPermission::new(Scope::organization(org), vec![PermissionKey::OrgsRead]);
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["organizationId"], org.to_string());
        assert!(json.get("schoolId").is_none());
        assert_eq!(json["actions"][0], "orgs:read");
    }

    #[test]
    fn empty_grant_allows_nothing() {
        let grant = UserPermission::new(Scope::organization(Uuid::new_v4()), vec![]);
        assert!(!grant.allows_all(&[PermissionKey::OrgsRead]));
        assert!(!grant.allows_all(&[]));
    }

    #[test]
    fn org_wide_grant_does_not_trust_a_requested_pairing() {
        let org = Uuid::new_v4();
        let school = Uuid::new_v4();
        let grant = UserPermission::new(Scope::organization(org), vec![PermissionKey::SchoolsRead]);

        assert!(grant.covers(&Scope::organization(org)));
        assert!(!grant.covers(&Scope::school_in(org, school)));
        assert!(!grant.covers(&Scope::school(school)));
        assert!(!grant.covers(&Scope::school_in(Uuid::new_v4(), school)));
    }

    #[test]
    fn org_wide_grant_reaches_placed_schools_of_its_organization() {
        let org = Uuid::new_v4();
        let grant = UserPermission::new(Scope::organization(org), vec![PermissionKey::SchoolsUpdate]);

        let own = SchoolPlacement::new(org, Uuid::new_v4());
        let foreign = SchoolPlacement::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(grant.covers_school(&own));
        assert!(!grant.covers_school(&foreign));
    }

    #[test]
    fn school_grant_needs_matching_placement() {
        let org = Uuid::new_v4();
        let school = Uuid::new_v4();
        let grant = UserPermission::new(Scope::school_in(org, school), vec![PermissionKey::CoursesRead]);

        assert!(grant.covers_school(&SchoolPlacement::new(org, school)));
        assert!(!grant.covers_school(&SchoolPlacement::new(Uuid::new_v4(), school)));
        assert!(!grant.covers_school(&SchoolPlacement::new(org, Uuid::new_v4())));

        let bare = UserPermission::new(Scope::school(school), vec![PermissionKey::CoursesRead]);
        assert!(bare.covers_school(&SchoolPlacement::new(org, school)));
    }

    #[test]
    fn empty_scope_matches_nothing() {
        let grant = UserPermission::owner(Uuid::new_v4());
        assert!(!grant.covers(&Scope::default()));
    }

    #[test]
    fn school_grant_matches_on_school_id() {
        let school = Uuid::new_v4();
        let grant = UserPermission::new(Scope::school(school), vec![PermissionKey::CoursesRead]);

        assert!(grant.covers(&Scope::school(school)));
        assert!(!grant.covers(&Scope::school(Uuid::new_v4())));
        assert!(!grant.covers(&Scope::organization(Uuid::new_v4())));
    }
}
