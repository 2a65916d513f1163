pub mod auth;
pub mod permission;

pub use auth::{auth_middleware, AuthUser};
pub use permission::{authorize, authorize_school, require_permissions};
