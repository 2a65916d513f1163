//! HTTP handlers.

pub mod me;
pub mod metrics;
pub mod session;

pub use me::{check_permission, get_me, get_scopes};
pub use session::{refresh, request_otp, signin_otp, signout};
