use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::UserPermission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenUse::Access => "access",
            TokenUse::Refresh => "refresh",
        }
    }
}

/// Claims shared by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Token ID, the revocation key
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub token_use: TokenUse,
    /// Permission snapshot; access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<UserPermission>>,
}

impl Claims {
    /// Lifetime the token was minted with, never less than one second.
    pub fn lifetime_seconds(&self) -> u64 {
        (self.exp - self.iat).max(1) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn expires_at(
    now: DateTime<Utc>,
    ttl: Option<TimeDelta>,
    token_use: TokenUse,
) -> Result<i64, anyhow::Error> {
    ttl.and_then(|ttl| now.checked_add_signed(ttl))
        .map(|exp| exp.timestamp())
        .ok_or_else(|| anyhow::anyhow!("{} token lifetime is out of range", token_use.as_str()))
}

/// HS256 token issuer and verifier.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }

        tracing::info!("JWT service initialized with HS256 secret");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, anyhow::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", claims.token_use.as_str(), e))
    }

    /// Mint an access/refresh pair for `user_id`, each with its own `jti`.
    pub fn generate_tokens(
        &self,
        user_id: Uuid,
        permissions: Option<Vec<UserPermission>>,
    ) -> Result<TokenPair, anyhow::Error> {
        let now = Utc::now();
        let access_exp = expires_at(
            now,
            TimeDelta::try_minutes(self.access_token_expiry_minutes),
            TokenUse::Access,
        )?;
        let refresh_exp = expires_at(
            now,
            TimeDelta::try_days(self.refresh_token_expiry_days),
            TokenUse::Refresh,
        )?;

        let access = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: access_exp,
            token_use: TokenUse::Access,
            permissions,
        };
        let refresh = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: refresh_exp,
            token_use: TokenUse::Refresh,
            permissions: None,
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
        })
    }

    /// Signature and expiry check. Any failure yields `None`.
    pub fn verify_token(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Token verification failed");
                None
            }
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Option<Claims> {
        self.verify_token(token)
            .filter(|claims| claims.token_use == TokenUse::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Option<Claims> {
        self.verify_token(token)
            .filter(|claims| claims.token_use == TokenUse::Refresh)
    }

    #[cfg(test)]
    pub(crate) fn sign_for_test(&self, claims: &Claims) -> String {
        self.sign(claims).unwrap()
    }
}
