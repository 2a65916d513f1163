//! Business logic for OTP sign-in, tokens and permissions.

mod auth;
mod database;
pub mod error;
mod jwt;
mod notifier;
mod otp;
pub mod permission;
mod revocation;
mod store;

pub use auth::{AuthContext, AuthService};
pub use database::{Database, MockUserRepository, UserRepository};
pub use error::ServiceError;
pub use jwt::{Claims, JwtService, TokenPair, TokenUse};
pub use notifier::{ChannelNotifier, MockNotifier, OtpNotifier, SentCode};
pub use otp::OtpService;
pub use permission::{ensure_assignable, Permissions, ScopeFilter};
pub use revocation::RevocationRegistry;
pub use store::{KeyValueStore, MockStore, RedisStore};
