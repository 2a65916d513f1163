use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

/// Shortest HS256 secret accepted at startup.
const MIN_JWT_SECRET_BYTES: usize = 32;
const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub smtp: SmtpConfig,
    pub sms: SmsConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub command_timeout_ms: u64,
}

impl RedisConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    /// Put a permission snapshot into access tokens instead of loading grants
    /// from the database on every request.
    pub embed_permissions: bool,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub alphabet: String,
    pub length: usize,
    pub expiry_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            alphabet: "0123456789".to_string(),
            length: 6,
            expiry_seconds: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: SecretString,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Peers whose `x-forwarded-for` header is believed for rate limiting.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub otp_attempts: u32,
    pub otp_window_seconds: u64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
                command_timeout_ms: parse_env("REDIS_COMMAND_TIMEOUT_MS", "2000", is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
                embed_permissions: parse_env("JWT_EMBED_PERMISSIONS", "true", is_prod)?,
            },
            otp: OtpConfig {
                alphabet: get_env("OTP_ALPHABET", Some("0123456789"), is_prod)?,
                length: parse_env("OTP_LENGTH", "6", is_prod)?,
                expiry_seconds: parse_env("OTP_EXPIRY_SECONDS", "300", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            sms: SmsConfig {
                webhook_url: env::var("SMS_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                trusted_proxies: parse_ip_list(&env::var("TRUSTED_PROXIES").unwrap_or_default())?,
            },
            rate_limit: RateLimitConfig {
                otp_attempts: parse_env("RATE_LIMIT_OTP_ATTEMPTS", "5", is_prod)?,
                otp_window_seconds: parse_env("RATE_LIMIT_OTP_WINDOW_SECONDS", "300", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            return Err(config_error("JWT_SECRET must be at least 32 bytes"));
        }

        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_MINUTES).contains(&self.jwt.access_token_expiry_minutes) {
            return Err(config_error(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and 1440",
            ));
        }

        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.jwt.refresh_token_expiry_days) {
            return Err(config_error(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be between 1 and 365",
            ));
        }

        if self.otp.alphabet.chars().count() < 2 {
            return Err(config_error("OTP_ALPHABET needs at least two characters"));
        }

        if !(4..=12).contains(&self.otp.length) {
            return Err(config_error("OTP_LENGTH must be between 4 and 12"));
        }

        if self.otp.expiry_seconds == 0 {
            return Err(config_error("OTP_EXPIRY_SECONDS must be positive"));
        }

        if self.redis.command_timeout_ms == 0 {
            return Err(config_error("REDIS_COMMAND_TIMEOUT_MS must be positive"));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(config_error(
                "Wildcard CORS origin not allowed in production",
            ));
        }

        Ok(())
    }
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("TRUSTED_PROXIES entry `{}`: {}", s, e))
            })
        })
        .collect()
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
