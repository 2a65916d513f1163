use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::OtpChannel;
use crate::services::TokenPair;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OtpRequest {
    #[serde(rename = "type")]
    #[schema(example = "email")]
    pub channel: OtpChannel,

    #[validate(length(min = 1, max = 320, message = "Destination is required"))]
    #[schema(example = "user@example.com")]
    pub destination: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpResponse {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = "OTP sent")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SigninOtpRequest {
    #[validate(length(min = 1, max = 320, message = "Login is required"))]
    #[schema(example = "user@example.com")]
    pub login: String,

    #[validate(length(min = 1, max = 64, message = "OTP is required"))]
    #[schema(example = "123456")]
    pub otp: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignoutResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_request_reads_type_field() {
        let req: OtpRequest =
            serde_json::from_str(r#"{"type":"sms","destination":"+15551234567"}"#).unwrap();
        assert_eq!(req.channel, OtpChannel::Sms);
        assert!(serde_json::from_str::<OtpRequest>(r#"{"type":"fax","destination":"x"}"#).is_err());
    }

    #[test]
    fn empty_login_fails_validation() {
        let req = SigninOtpRequest {
            login: String::new(),
            otp: "123456".to_string(),
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("login"));
    }
}
