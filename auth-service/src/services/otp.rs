use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ServiceError;
use super::store::KeyValueStore;
use crate::config::OtpConfig;
use crate::models::{LoginIdentifier, OtpChannel, OtpRecord};

/// Issues and consumes one-time codes keyed by login identifier.
#[derive(Clone)]
pub struct OtpService {
    store: Arc<dyn KeyValueStore>,
    alphabet: Vec<char>,
    length: usize,
    expiry_seconds: u64,
}

fn otp_key(login: &LoginIdentifier) -> String {
    format!("otp:{}", login.as_str())
}

impl OtpService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &OtpConfig) -> Self {
        Self {
            store,
            alphabet: config.alphabet.chars().collect(),
            length: config.length,
            expiry_seconds: config.expiry_seconds,
        }
    }

    fn random_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }

    fn new_record(&self, channel: OtpChannel) -> Result<(OtpRecord, String), ServiceError> {
        let record = OtpRecord {
            code: self.random_code(),
            channel,
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode OTP: {}", e)))?;
        Ok((record, payload))
    }

    /// Store a fresh code for `login`, replacing any previous one.
    pub async fn generate(
        &self,
        login: &LoginIdentifier,
        channel: OtpChannel,
    ) -> Result<OtpRecord, ServiceError> {
        let (record, payload) = self.new_record(channel)?;
        self.store
            .set_ex(&otp_key(login), &payload, self.expiry_seconds)
            .await?;
        Ok(record)
    }

    /// Store a fresh code only when none is live. `None` means a code was
    /// already issued and is left in place.
    pub async fn issue(
        &self,
        login: &LoginIdentifier,
        channel: OtpChannel,
    ) -> Result<Option<OtpRecord>, ServiceError> {
        let (record, payload) = self.new_record(channel)?;
        let created = self
            .store
            .set_nx_ex(&otp_key(login), &payload, self.expiry_seconds)
            .await?;
        Ok(created.then_some(record))
    }

    /// True when no live code exists for `login`.
    pub async fn is_expired(&self, login: &LoginIdentifier) -> Result<bool, ServiceError> {
        Ok(!self.store.exists(&otp_key(login)).await?)
    }

    /// Consume the code for `login`. A mismatch leaves the stored record in
    /// place; a match deletes it so the same code never validates twice.
    pub async fn validate(
        &self,
        login: &LoginIdentifier,
        code: &str,
    ) -> Result<Option<OtpRecord>, ServiceError> {
        let key = otp_key(login);
        let Some(payload) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let record: OtpRecord = match serde_json::from_str(&payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable OTP record");
                return Ok(None);
            }
        };

        let matches: bool = record.code.as_bytes().ct_eq(code.as_bytes()).into();
        if !matches {
            return Ok(None);
        }

        // Another request may have consumed the same payload between GET and here.
        if self.store.compare_and_delete(&key, &payload).await? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MockStore;

    fn service() -> OtpService {
        OtpService::new(Arc::new(MockStore::new()), &OtpConfig::default())
    }

    fn login() -> LoginIdentifier {
        LoginIdentifier::Email("user@example.com".to_string())
    }

    #[tokio::test]
    async fn generated_code_follows_alphabet_and_length() {
        let otp = OtpService::new(
            Arc::new(MockStore::new()),
            &OtpConfig {
                alphabet: "AB".to_string(),
                length: 8,
                expiry_seconds: 60,
            },
        );
        let record = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        assert_eq!(record.code.len(), 8);
        assert!(record.code.chars().all(|c| c == 'A' || c == 'B'));
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let otp = service();
        let record = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        assert!(!otp.is_expired(&login()).await.unwrap());

        let first = otp.validate(&login(), &record.code).await.unwrap();
        assert_eq!(first, Some(record.clone()));
        assert!(otp.is_expired(&login()).await.unwrap());
        assert_eq!(otp.validate(&login(), &record.code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn mismatch_leaves_record_untouched() {
        let otp = service();
        let record = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        let wrong = if record.code == "000000" { "111111" } else { "000000" };

        assert_eq!(otp.validate(&login(), wrong).await.unwrap(), None);
        assert!(!otp.is_expired(&login()).await.unwrap());
        assert!(otp.validate(&login(), &record.code).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn regenerate_replaces_previous_code() {
        let otp = service();
        let first = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        let second = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        if first.code != second.code {
            assert_eq!(otp.validate(&login(), &first.code).await.unwrap(), None);
        }
        assert!(otp.validate(&login(), &second.code).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn issue_keeps_the_live_code() {
        let otp = service();
        let first = otp.issue(&login(), OtpChannel::Email).await.unwrap().unwrap();
        assert_eq!(otp.issue(&login(), OtpChannel::Email).await.unwrap(), None);
        assert_eq!(otp.validate(&login(), &first.code).await.unwrap(), Some(first));

        // Consumed, so a new one may be issued.
        assert!(otp.issue(&login(), OtpChannel::Email).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_issue_has_one_winner() {
        let otp = service();
        let (la, lb) = (login(), login());
        let (a, b) = futures::join!(
            otp.issue(&la, OtpChannel::Email),
            otp.issue(&lb, OtpChannel::Email),
        );
        let issued = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(issued, 1);
    }

    /// Yields inside `get` so concurrent validations interleave between the
    /// read and the compare-and-delete.
    struct YieldingStore(MockStore);

    #[async_trait::async_trait]
    impl KeyValueStore for YieldingStore {
        async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), ServiceError> {
            self.0.set_ex(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
            let value = self.0.get(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
            self.0.exists(key).await
        }

        async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, ServiceError> {
            self.0.compare_and_delete(key, expected).await
        }

        async fn set_nx_ex(&self, key: &str, value: &str, ttl: u64) -> Result<bool, ServiceError> {
            self.0.set_nx_ex(key, value, ttl).await
        }

        async fn health_check(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_correct_submissions_validate_once() {
        let store = Arc::new(YieldingStore(MockStore::new()));
        let otp = OtpService::new(store.clone(), &OtpConfig::default());
        let record = otp.generate(&login(), OtpChannel::Email).await.unwrap();

        // Both reads happen before either delete.
        let (la, lb) = (login(), login());
        let (a, b) = futures::join!(
            otp.validate(&la, &record.code),
            otp.validate(&lb, &record.code),
        );
        let winners = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(winners, 1);
        assert!(!store.exists("otp:user@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_login_validates_to_none() {
        assert_eq!(service().validate(&login(), "123456").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn code_expires_after_ttl() {
        let otp = service();
        let record = otp.generate(&login(), OtpChannel::Email).await.unwrap();
        tokio::time::advance(std::time::Duration::from_secs(301)).await;
        assert!(otp.is_expired(&login()).await.unwrap());
        assert_eq!(otp.validate(&login(), &record.code).await.unwrap(), None);
    }
}
