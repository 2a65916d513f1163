use std::sync::Arc;

use super::{
    Claims, JwtService, OtpNotifier, OtpService, Permissions, RevocationRegistry, ServiceError,
    TokenPair, UserRepository,
};
use crate::models::{LoginIdentifier, User, UserPermission};

/// Verified caller identity, attached to requests by the bearer guard.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub permissions: Permissions,
}

impl AuthContext {
    pub fn user_id(&self) -> uuid::Uuid {
        self.claims.sub
    }
}

/// OTP sign-in, token rotation and sign-out.
#[derive(Clone)]
pub struct AuthService {
    otp: OtpService,
    jwt: JwtService,
    revocation: RevocationRegistry,
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn OtpNotifier>,
    embed_permissions: bool,
    otp_expiry_seconds: u64,
}

impl AuthService {
    pub fn new(
        otp: OtpService,
        jwt: JwtService,
        revocation: RevocationRegistry,
        users: Arc<dyn UserRepository>,
        notifier: Arc<dyn OtpNotifier>,
        config: &crate::config::AuthConfig,
    ) -> Self {
        Self {
            otp,
            jwt,
            revocation,
            users,
            notifier,
            embed_permissions: config.jwt.embed_permissions,
            otp_expiry_seconds: config.otp.expiry_seconds,
        }
    }

    /// Issue a code unless one is still live for this login.
    #[tracing::instrument(skip_all, fields(channel = login.channel().as_str()))]
    pub async fn request_otp(&self, login: LoginIdentifier) -> Result<(), ServiceError> {
        let Some(record) = self.otp.issue(&login, login.channel()).await? else {
            tracing::info!("OTP requested while a code is still live");
            return Err(ServiceError::OtpAlreadyIssued);
        };
        metrics::counter!("auth_otp_issued_total", "channel" => login.channel().as_str())
            .increment(1);

        let notifier = self.notifier.clone();
        let expires_in = self.otp_expiry_seconds;
        tokio::spawn(async move {
            if let Err(e) = notifier.send_code(&login, &record.code, expires_in).await {
                tracing::error!(error = %e, channel = login.channel().as_str(), "Failed to deliver OTP");
            }
        });

        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub async fn sign_in_with_otp(&self, login: &str, code: &str) -> Result<TokenPair, ServiceError> {
        let result = self.try_sign_in(login, code).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(ServiceError::InvalidOtp) => "invalid_otp",
            Err(_) => "error",
        };
        metrics::counter!("auth_signin_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_sign_in(&self, login: &str, code: &str) -> Result<TokenPair, ServiceError> {
        let login = LoginIdentifier::infer(login).map_err(|_| ServiceError::InvalidOtp)?;
        let record = self
            .otp
            .validate(&login, code)
            .await?
            .ok_or(ServiceError::InvalidOtp)?;

        // The stored channel decides which user column the login belongs to.
        let login = LoginIdentifier::parse(login.as_str(), record.channel)
            .map_err(|_| ServiceError::InvalidOtp)?;

        let user = match self.users.find_by_login(&login).await? {
            Some(user) => user,
            None => {
                let user = self.users.create(&User::new(&login)).await?;
                tracing::info!(user_id = %user.id, "Created user on first sign-in");
                user
            }
        };

        let tokens = self.issue_tokens(user.id).await?;
        tracing::info!(user_id = %user.id, "User signed in");
        Ok(tokens)
    }

    async fn issue_tokens(&self, user_id: uuid::Uuid) -> Result<TokenPair, ServiceError> {
        let permissions = if self.embed_permissions {
            Some(self.users.find_permissions(user_id).await?)
        } else {
            None
        };
        Ok(self.jwt.generate_tokens(user_id, permissions)?)
    }

    /// Rotate a refresh token. Each refresh token is accepted at most once.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self
            .jwt
            .verify_refresh_token(refresh_token)
            .ok_or(ServiceError::InvalidToken)?;

        if !self.revocation.revoke_if_active(&claims).await? {
            tracing::warn!(user_id = %claims.sub, jti = %claims.jti, "Refresh token replayed");
            return Err(ServiceError::InvalidToken);
        }

        let tokens = self.issue_tokens(claims.sub).await?;
        tracing::info!(user_id = %claims.sub, "Tokens refreshed");
        Ok(tokens)
    }

    /// Revoke the caller's access token and, when it belongs to the same
    /// user, the presented refresh token. Repeating a sign-out is harmless.
    #[tracing::instrument(skip_all, fields(user_id = %access.sub))]
    pub async fn sign_out(&self, access: &Claims, refresh_token: Option<&str>) -> Result<(), ServiceError> {
        self.revocation.revoke(access).await?;

        if let Some(refresh) = refresh_token.and_then(|t| self.jwt.verify_refresh_token(t)) {
            if refresh.sub == access.sub {
                self.revocation.revoke(&refresh).await?;
            } else {
                tracing::warn!("Sign-out presented a refresh token of another user");
            }
        }

        tracing::info!("User signed out");
        Ok(())
    }

    /// Resolve a bearer token into the caller's identity and grants.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthContext, ServiceError> {
        let claims = self
            .jwt
            .verify_access_token(access_token)
            .ok_or(ServiceError::InvalidToken)?;

        if self.revocation.is_revoked(&claims).await? {
            tracing::debug!(jti = %claims.jti, "Rejected revoked access token");
            return Err(ServiceError::InvalidToken);
        }

        let grants = self.permissions_for(&claims).await?;
        Ok(AuthContext {
            claims,
            permissions: Permissions::new(grants),
        })
    }

    async fn permissions_for(&self, claims: &Claims) -> Result<Vec<UserPermission>, ServiceError> {
        match (&claims.permissions, self.embed_permissions) {
            (Some(embedded), true) => Ok(embedded.clone()),
            _ => self.users.find_permissions(claims.sub).await,
        }
    }
}
