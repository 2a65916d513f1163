use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("otp is invalid")]
    InvalidOtp,

    #[error("Invalid token")]
    InvalidToken,

    #[error("An OTP was already sent to this destination")]
    OtpAlreadyIssued,

    #[error("User does not have permission")]
    Forbidden,

    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::ServiceUnavailable(e),
            ServiceError::StoreUnavailable(e) => AppError::ServiceUnavailable(anyhow::anyhow!(e)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidOtp => AppError::Unauthorized(anyhow::anyhow!("otp is invalid")),
            ServiceError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            ServiceError::OtpAlreadyIssued => AppError::TooManyRequests(
                "An OTP was already sent to this destination. Please wait before requesting another."
                    .to_string(),
                None,
            ),
            ServiceError::Forbidden => {
                AppError::Forbidden(anyhow::anyhow!("User does not have permission"))
            }
            ServiceError::Validation(messages) => AppError::InvalidFields(messages),
        }
    }
}
