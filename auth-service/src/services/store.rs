//! Key-value storage for OTP records and revocation markers.
//!
//! [`RedisStore`] is the production backend. [`MockStore`] keeps everything
//! in process memory and honours TTLs against the tokio clock, so tests can
//! pause and advance time.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::error::ServiceError;
use crate::config::RedisConfig;

/// Deletes KEYS[1] only while it still holds ARGV[1]. Returns 1 on delete.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError>;

    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError>;

    async fn exists(&self, key: &str) -> Result<bool, ServiceError>;

    /// Atomically remove `key` if its value is exactly `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, ServiceError>;

    /// Atomically create `key` only when it is absent. True when this call
    /// created it.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<bool, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    command_timeout: Duration,
    compare_and_delete: Script,
}

impl RedisStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            command_timeout: config.command_timeout(),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_timeout() || e.is_connection_dropped() || e.is_io_error() {
                    Err(ServiceError::StoreUnavailable(format!("redis {}: {}", op, e)))
                } else {
                    Err(ServiceError::Store(anyhow::anyhow!("redis {} failed: {}", op, e)))
                }
            }
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.command_timeout.as_millis() as u64, "Redis command timed out");
                Err(ServiceError::StoreUnavailable(format!("redis {} timed out", op)))
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "SET",
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_seconds)
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "GET",
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn),
        )
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        let mut conn = self.manager.clone();
        self.bounded(
            "EXISTS",
            redis::cmd("EXISTS").arg(key).query_async::<_, bool>(&mut conn),
        )
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, ServiceError> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .bounded(
                "EVALSHA",
                self.compare_and_delete
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(deleted == 1)
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, ServiceError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .bounded(
                "SET NX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_seconds)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        self.bounded("PING", redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await
            .map(|_| ())
    }
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, (String, Instant)>) -> T,
    ) -> Result<T, ServiceError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ServiceError::Store(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))?;
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(f(&mut entries))
    }
}

fn expiry(ttl_seconds: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_seconds)
}

#[async_trait]
impl KeyValueStore for MockStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError> {
        self.with_live(|entries| {
            entries.insert(key.to_string(), (value.to_string(), expiry(ttl_seconds)));
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        self.with_live(|entries| entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        self.with_live(|entries| entries.contains_key(key))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, ServiceError> {
        self.with_live(|entries| match entries.get(key) {
            Some((value, _)) if value == expected => {
                entries.remove(key);
                true
            }
            _ => false,
        })
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, ServiceError> {
        self.with_live(|entries| {
            if entries.contains_key(key) {
                false
            } else {
                entries.insert(key.to_string(), (value.to_string(), expiry(ttl_seconds)));
                true
            }
        })
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
