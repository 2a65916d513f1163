use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{SmsConfig, SmtpConfig};
use crate::models::{LoginIdentifier, OtpChannel};

/// Delivers one-time codes. Callers do not wait on delivery outcome.
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_code(
        &self,
        login: &LoginIdentifier,
        code: &str,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    message: String,
}

/// SMTP for email logins, an HTTP webhook for phone logins.
#[derive(Clone)]
pub struct ChannelNotifier {
    mailer: SmtpTransport,
    from_email: String,
    http: reqwest::Client,
    sms_webhook_url: Option<String>,
}

impl ChannelNotifier {
    pub fn new(smtp: &SmtpConfig, sms: &SmsConfig) -> Result<Self, anyhow::Error> {
        let mailer = if smtp.user.is_empty() {
            // Local relay such as mailpit; no TLS, no auth.
            SmtpTransport::builder_dangerous(smtp.host.as_str())
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            let creds = Credentials::new(
                smtp.user.clone(),
                smtp.password.expose_secret().to_string(),
            );
            SmtpTransport::starttls_relay(&smtp.host)
                .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", smtp.host, e))?
                .credentials(creds)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        if sms.webhook_url.is_none() {
            tracing::warn!("SMS_WEBHOOK_URL not set; SMS codes will only be logged");
        }

        tracing::info!(smtp_host = %smtp.host, "OTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: smtp.from.clone(),
            http,
            sms_webhook_url: sms.webhook_url.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        code: &str,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let minutes = (expires_in_seconds / 60).max(1);
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject("Your sign-in code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Your sign-in code is {}\n\nIt expires in {} minutes. If you did not request it, you can ignore this email.",
                code, minutes
            ))?;

        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| anyhow::anyhow!("Email task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;

        tracing::info!(channel = "email", "OTP delivered");
        Ok(())
    }

    async fn send_sms(&self, phone: &str, code: &str) -> Result<(), anyhow::Error> {
        let Some(url) = &self.sms_webhook_url else {
            tracing::info!(channel = "sms", "No SMS webhook configured; skipping delivery");
            return Ok(());
        };

        self.http
            .post(url)
            .json(&SmsPayload {
                to: phone,
                message: format!("Your sign-in code is {}", code),
            })
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(channel = "sms", "OTP delivered");
        Ok(())
    }
}

#[async_trait]
impl OtpNotifier for ChannelNotifier {
    async fn send_code(
        &self,
        login: &LoginIdentifier,
        code: &str,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        match login {
            LoginIdentifier::Email(email) => self.send_email(email, code, expires_in_seconds).await,
            LoginIdentifier::Phone(phone) => self.send_sms(phone, code).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub destination: String,
    pub channel: OtpChannel,
    pub code: String,
}

/// Records every delivery so tests can read the code back.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentCode>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentCode> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_code_for(&self, destination: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|s| s.destination == destination)
            .map(|s| s.code)
    }
}

#[async_trait]
impl OtpNotifier for MockNotifier {
    async fn send_code(
        &self,
        login: &LoginIdentifier,
        code: &str,
        _expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock notifier mutex poisoned: {}", e))?
            .push(SentCode {
                destination: login.as_str().to_string(),
                channel: login.channel(),
                code: code.to_string(),
            });
        Ok(())
    }
}
