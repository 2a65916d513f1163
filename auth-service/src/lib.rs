pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use service_core::observability::MetricsHandle;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::config::AuthConfig;
use crate::services::{AuthService, KeyValueStore, UserRepository};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::session::request_otp,
        handlers::session::signin_otp,
        handlers::session::refresh,
        handlers::session::signout,
        handlers::me::get_me,
        handlers::me::get_scopes,
        handlers::me::check_permission,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::OtpRequest,
            dtos::auth::OtpResponse,
            dtos::auth::SigninOtpRequest,
            dtos::auth::TokenPairResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::SignoutRequest,
            dtos::auth::SignoutResponse,
            dtos::me::MeResponse,
            dtos::me::ScopesResponse,
            handlers::me::CheckResponse,
            models::OtpChannel,
            models::Scope,
            models::UserPermission,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "OTP sign-in and token management"),
        (name = "User", description = "Caller identity and permissions"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub auth: AuthService,
    pub store: Arc<dyn KeyValueStore>,
    pub users: Arc<dyn UserRepository>,
    pub metrics: Option<MetricsHandle>,
    pub otp_rate_limiter: IpRateLimiter,
    pub signin_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        auth: AuthService,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn UserRepository>,
        metrics: Option<MetricsHandle>,
    ) -> Self {
        let limits = &config.rate_limit;
        let proxies = &config.security.trusted_proxies;
        let otp_rate_limiter = create_ip_rate_limiter(limits.otp_attempts, limits.otp_window_seconds)
            .with_trusted_proxies(proxies);
        let signin_rate_limiter =
            create_ip_rate_limiter(limits.otp_attempts, limits.otp_window_seconds)
                .with_trusted_proxies(proxies);
        Self {
            config: Arc::new(config),
            auth,
            store,
            users,
            metrics,
            otp_rate_limiter,
            signin_rate_limiter,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_router(state: AppState) -> Router {
    let otp_route = Router::new()
        .route("/auth/otp", post(handlers::request_otp))
        .layer(from_fn_with_state(
            state.otp_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let signin_route = Router::new()
        .route("/auth/signin/otp", post(handlers::signin_otp))
        .layer(from_fn_with_state(
            state.signin_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected = Router::new()
        .route("/auth/signout", post(handlers::signout))
        .route("/auth/me", get(handlers::get_me))
        .route("/auth/me/scopes", get(handlers::get_scopes))
        .route("/auth/me/permissions/check", get(handlers::check_permission))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/refresh", post(handlers::refresh))
        .merge(otp_route)
        .merge(signin_route)
        .merge(protected)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A dependency is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.users.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable(anyhow::anyhow!("database: {}", e))
    })?;

    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        AppError::ServiceUnavailable(anyhow::anyhow!("redis: {}", e))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up",
            "redis": "up"
        }
    })))
}
