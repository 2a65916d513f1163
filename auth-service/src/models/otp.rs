//! OTP records and the login identifiers they are keyed by.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Delivery channel for a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Email,
    Sms,
}

impl OtpChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Email => "email",
            OtpChannel::Sms => "sms",
        }
    }
}

/// Stored payload under `otp:<login>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code: String,
    pub channel: OtpChannel,
}

/// A normalised email address or E.164 phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoginIdentifier {
    Email(String),
    Phone(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("destination: invalid email address")]
    InvalidEmail,
    #[error("destination: phone numbers must use E.164 format (+15551234567)")]
    InvalidPhone,
}

impl LoginIdentifier {
    /// Parse a destination for an explicit channel.
    pub fn parse(raw: &str, channel: OtpChannel) -> Result<Self, LoginError> {
        match channel {
            OtpChannel::Email => Self::email(raw),
            OtpChannel::Sms => Self::phone(raw),
        }
    }

    /// Parse a login whose channel is implied by its shape.
    pub fn infer(raw: &str) -> Result<Self, LoginError> {
        if raw.contains('@') {
            Self::email(raw)
        } else {
            Self::phone(raw)
        }
    }

    fn email(raw: &str) -> Result<Self, LoginError> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if valid {
            Ok(LoginIdentifier::Email(email))
        } else {
            Err(LoginError::InvalidEmail)
        }
    }

    fn phone(raw: &str) -> Result<Self, LoginError> {
        let phone: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();
        let digits = phone.strip_prefix('+').ok_or(LoginError::InvalidPhone)?;
        if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
            Ok(LoginIdentifier::Phone(phone))
        } else {
            Err(LoginError::InvalidPhone)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LoginIdentifier::Email(v) | LoginIdentifier::Phone(v) => v,
        }
    }

    pub fn channel(&self) -> OtpChannel {
        match self {
            LoginIdentifier::Email(_) => OtpChannel::Email,
            LoginIdentifier::Phone(_) => OtpChannel::Sms,
        }
    }
}
