//! Shared setup for HTTP integration tests: the real router over in-memory
//! store, repository and notifier.

#![allow(dead_code)]

use auth_service::{
    build_router,
    config::{
        AuthConfig, DatabaseConfig, Environment, JwtConfig, OtpConfig, RateLimitConfig,
        RedisConfig, SecurityConfig, SmsConfig, SmtpConfig,
    },
    services::{
        AuthService, JwtService, KeyValueStore, MockNotifier, MockStore, MockUserRepository,
        OtpService, RevocationRegistry,
    },
    AppState,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-that-is-long-enough";

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "auth-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
            command_timeout_ms: 500,
        },
        jwt: JwtConfig {
            secret: SecretString::new(TEST_JWT_SECRET.to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            embed_permissions: true,
        },
        otp: OtpConfig::default(),
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            user: String::new(),
            password: SecretString::new(String::new()),
            from: "no-reply@localhost".to_string(),
        },
        sms: SmsConfig { webhook_url: None },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trusted_proxies: vec![],
        },
        rate_limit: RateLimitConfig {
            otp_attempts: 100,
            otp_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MockStore>,
    pub users: Arc<MockUserRepository>,
    pub notifier: Arc<MockNotifier>,
    pub jwt: JwtService,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let store = Arc::new(MockStore::new());
        let users = Arc::new(MockUserRepository::new());
        let notifier = Arc::new(MockNotifier::new());
        let jwt = JwtService::new(&config.jwt).expect("jwt service");

        let kv: Arc<dyn KeyValueStore> = store.clone();
        let auth = AuthService::new(
            OtpService::new(kv.clone(), &config.otp),
            jwt.clone(),
            RevocationRegistry::new(kv.clone()),
            users.clone(),
            notifier.clone(),
            &config,
        );
        let state = AppState::new(config, auth, kv, users.clone(), None);

        Self {
            router: build_router(state),
            store,
            users,
            notifier,
            jwt,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 40000))));
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request("POST", uri, Some(body), None).await
    }

    /// Request a code and return it once the background delivery ran.
    pub async fn request_code(&self, kind: &str, destination: &str, normalized: &str) -> String {
        let before = self.notifier.sent().len();
        let res = self
            .post(
                "/auth/otp",
                serde_json::json!({ "type": kind, "destination": destination }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "otp request failed: {}", res.body);

        for _ in 0..100 {
            if self.notifier.sent().len() > before {
                return self
                    .notifier
                    .last_code_for(normalized)
                    .expect("code for destination");
            }
            tokio::task::yield_now().await;
        }
        panic!("no OTP delivered to {}", normalized);
    }

    /// Full OTP sign-in; returns (access, refresh).
    pub async fn sign_in(&self, email: &str) -> (String, String) {
        let code = self.request_code("email", email, email).await;
        let res = self
            .post(
                "/auth/signin/otp",
                serde_json::json!({ "login": email, "otp": code }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "sign-in failed: {}", res.body);
        (
            res.body["accessToken"].as_str().expect("accessToken").to_string(),
            res.body["refreshToken"].as_str().expect("refreshToken").to_string(),
        )
    }
}
