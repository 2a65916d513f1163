pub mod otp;
pub mod permission;
pub mod user;

pub use otp::{LoginError, LoginIdentifier, OtpChannel, OtpRecord};
pub use permission::{PermissionKey, SchoolPlacement, Scope, UnknownPermission, UserPermission};
pub use user::{PermissionRow, User, UserRow};
