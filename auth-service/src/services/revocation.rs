use std::sync::Arc;

use super::error::ServiceError;
use super::jwt::Claims;
use super::store::KeyValueStore;

const REVOKED_MARKER: &str = "1";

fn revocation_key(claims: &Claims) -> String {
    format!("tokens:revoked:{}", claims.jti)
}

/// Revoked token ids, each kept for the lifetime of its token.
#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl RevocationRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Idempotent.
    pub async fn revoke(&self, claims: &Claims) -> Result<(), ServiceError> {
        self.store
            .set_ex(
                &revocation_key(claims),
                REVOKED_MARKER,
                claims.lifetime_seconds(),
            )
            .await?;
        metrics::counter!("auth_tokens_revoked_total", "token_use" => claims.token_use.as_str())
            .increment(1);
        Ok(())
    }

    pub async fn is_revoked(&self, claims: &Claims) -> Result<bool, ServiceError> {
        self.store.exists(&revocation_key(claims)).await
    }

    /// Revoke unless already revoked. Only the caller that flips the token
    /// from active to revoked gets `true`.
    pub async fn revoke_if_active(&self, claims: &Claims) -> Result<bool, ServiceError> {
        let flipped = self
            .store
            .set_nx_ex(
                &revocation_key(claims),
                REVOKED_MARKER,
                claims.lifetime_seconds(),
            )
            .await?;
        if flipped {
            metrics::counter!("auth_tokens_revoked_total", "token_use" => claims.token_use.as_str())
                .increment(1);
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jwt::TokenUse;
    use crate::services::store::MockStore;
    use uuid::Uuid;

    fn claims(lifetime: i64) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            iat: 1_000,
            exp: 1_000 + lifetime,
            token_use: TokenUse::Refresh,
            permissions: None,
        }
    }

    #[tokio::test]
    async fn never_revoked_is_not_revoked() {
        let registry = RevocationRegistry::new(Arc::new(MockStore::new()));
        assert!(!registry.is_revoked(&claims(60)).await.unwrap());
    }

    #[tokio::test]
    async fn revocation_is_sticky_and_idempotent() {
        let registry = RevocationRegistry::new(Arc::new(MockStore::new()));
        let token = claims(60);

        registry.revoke(&token).await.unwrap();
        registry.revoke(&token).await.unwrap();
        assert!(registry.is_revoked(&token).await.unwrap());
        assert!(!registry.revoke_if_active(&token).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_if_active_flips_exactly_once() {
        let registry = RevocationRegistry::new(Arc::new(MockStore::new()));
        let token = claims(60);

        assert!(registry.revoke_if_active(&token).await.unwrap());
        assert!(!registry.revoke_if_active(&token).await.unwrap());
        assert!(registry.is_revoked(&token).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_lives_as_long_as_the_token() {
        let registry = RevocationRegistry::new(Arc::new(MockStore::new()));
        let token = claims(30);
        registry.revoke(&token).await.unwrap();

        tokio::time::advance(std::time::Duration::from_secs(29)).await;
        assert!(registry.is_revoked(&token).await.unwrap());
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert!(!registry.is_revoked(&token).await.unwrap());
    }
}
