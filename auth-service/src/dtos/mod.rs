pub mod auth;
pub mod me;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body written by `service_core::error::AppError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "otp is invalid")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}
