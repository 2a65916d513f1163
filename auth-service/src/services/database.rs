//! User persistence.
//!
//! [`Database`] talks to PostgreSQL through sqlx; [`MockUserRepository`]
//! keeps users and grants in memory for tests.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{
    LoginIdentifier, PermissionRow, SchoolPlacement, User, UserPermission, UserRow,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError>;

    /// Insert `user`. When a concurrent sign-in created the same login first,
    /// the existing record is returned instead.
    async fn create(&self, user: &User) -> Result<User, ServiceError>;

    /// Role grants plus the implicit owner grant of every owned organization.
    async fn find_permissions(&self, user_id: Uuid) -> Result<Vec<UserPermission>, ServiceError>;

    /// The organization a school is stored under.
    async fn find_school(&self, school_id: Uuid) -> Result<Option<SchoolPlacement>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;

    async fn find_by_login(&self, login: &LoginIdentifier) -> Result<Option<User>, ServiceError> {
        match login {
            LoginIdentifier::Email(email) => self.find_by_email(email).await,
            LoginIdentifier::Phone(phone) => self.find_by_phone(phone).await,
        }
    }
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const USER_COLUMNS: &str = "user_id, email, phone, created_utc";

#[async_trait]
impl UserRepository for Database {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE phone = $1",
            USER_COLUMNS
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn create(&self, user: &User) -> Result<User, ServiceError> {
        let inserted = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (user_id, email, phone, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        let existing = match (&user.email, &user.phone) {
            (Some(email), _) => self.find_by_email(email).await?,
            (None, Some(phone)) => self.find_by_phone(phone).await?,
            (None, None) => None,
        };
        existing.ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!(
                "User insert conflicted but no existing user was found"
            ))
        })
    }

    async fn find_permissions(&self, user_id: Uuid) -> Result<Vec<UserPermission>, ServiceError> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT ur.organization_id, ur.school_id, r.permissions AS actions
            FROM user_roles ur
            JOIN roles r ON r.role_id = ur.role_id
            WHERE ur.user_id = $1
            UNION ALL
            SELECT o.organization_id, NULL::uuid AS school_id, ARRAY['*']::text[] AS actions
            FROM organizations o
            WHERE o.owner_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserPermission::from).collect())
    }

    async fn find_school(&self, school_id: Uuid) -> Result<Option<SchoolPlacement>, ServiceError> {
        let row: Option<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT organization_id, school_id FROM schools WHERE school_id = $1",
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(organization_id, school_id)| SchoolPlacement::new(organization_id, school_id)))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Database health check failed");
            ServiceError::Database(e)
        })?;
        Ok(())
    }
}

/// In-memory repository for tests.
#[derive(Default)]
pub struct MockUserRepository {
    users: Mutex<Vec<User>>,
    grants: Mutex<HashMap<Uuid, Vec<UserPermission>>>,
    schools: Mutex<HashMap<Uuid, Uuid>>,
}

impl MockUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a grant to `user_id`.
    pub fn grant(&self, user_id: Uuid, permission: UserPermission) {
        if let Ok(mut grants) = self.grants.lock() {
            grants.entry(user_id).or_default().push(permission);
        }
    }

    /// Register `school_id` under `organization_id`.
    pub fn add_school(&self, organization_id: Uuid, school_id: Uuid) {
        if let Ok(mut schools) = self.schools.lock() {
            schools.insert(school_id, organization_id);
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().map(|users| users.len()).unwrap_or(0)
    }

    fn lock_users(&self) -> Result<std::sync::MutexGuard<'_, Vec<User>>, ServiceError> {
        self.users
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock users mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError> {
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<User, ServiceError> {
        let mut users = self.lock_users()?;
        let existing = users.iter().find(|u| {
            let same_email = matches!((&u.email, &user.email), (Some(a), Some(b)) if a.eq_ignore_ascii_case(b));
            let same_phone = u.phone.is_some() && u.phone == user.phone;
            same_email || same_phone
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        users.push(user.clone());
        Ok(user.clone())
    }

    async fn find_permissions(&self, user_id: Uuid) -> Result<Vec<UserPermission>, ServiceError> {
        let grants = self
            .grants
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock grants mutex poisoned: {}", e)))?;
        Ok(grants.get(&user_id).cloned().unwrap_or_default())
    }

    async fn find_school(&self, school_id: Uuid) -> Result<Option<SchoolPlacement>, ServiceError> {
        let schools = self
            .schools
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock schools mutex poisoned: {}", e)))?;
        Ok(schools
            .get(&school_id)
            .map(|organization_id| SchoolPlacement::new(*organization_id, school_id)))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent_per_login() {
        let repo = MockUserRepository::new();
        let login = LoginIdentifier::Email("user@example.com".to_string());

        let first = repo.create(&User::new(&login)).await.unwrap();
        let second = repo.create(&User::new(&login)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.user_count(), 1);
        assert_eq!(repo.find_by_login(&login).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let repo = MockUserRepository::new();
        let user = repo
            .create(&User::new(&LoginIdentifier::Email("user@example.com".to_string())))
            .await
            .unwrap();
        assert_eq!(
            repo.find_by_email("USER@example.com").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
        assert!(repo.find_by_phone("+15551234567").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn school_lookup_returns_stored_organization() {
        let repo = MockUserRepository::new();
        let org = Uuid::new_v4();
        let school = Uuid::new_v4();
        repo.add_school(org, school);

        let placement = repo.find_school(school).await.unwrap().unwrap();
        assert_eq!(placement.organization_id(), org);
        assert_eq!(placement.school_id(), school);
        assert!(repo.find_school(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn postgres_round_trip() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let db = Database::new(pool);

        let login = LoginIdentifier::Phone(format!("+1555{:07}", rand::random::<u32>() % 10_000_000));
        let user = db.create(&User::new(&login)).await.unwrap();
        assert_eq!(db.find_by_login(&login).await.unwrap().map(|u| u.id), Some(user.id));
        assert!(db.find_permissions(user.id).await.unwrap().is_empty());
    }
}
