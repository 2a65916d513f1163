use auth_service::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        AuthService, ChannelNotifier, Database, JwtService, KeyValueStore, OtpService,
        RedisStore, RevocationRegistry, UserRepository,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    let metrics = init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        embed_permissions = config.jwt.embed_permissions,
        "Starting authentication service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migrations failed: {}", e)))?;
    let users: Arc<dyn UserRepository> = Arc::new(Database::new(pool));

    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::new(&config.redis)
            .await
            .map_err(AppError::ServiceUnavailable)?,
    );

    let notifier = Arc::new(ChannelNotifier::new(&config.smtp, &config.sms)?);
    let jwt = JwtService::new(&config.jwt)?;

    let auth = AuthService::new(
        OtpService::new(store.clone(), &config.otp),
        jwt,
        RevocationRegistry::new(store.clone()),
        users.clone(),
        notifier,
        &config,
    );

    let addr = config.common.socket_addr();
    let grace = config.common.shutdown_grace();
    let state = AppState::new(config, auth, store, users, Some(metrics));
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (stopping_tx, stopping_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stopping_tx.send(());
    })
    .into_future();

    let deadline = async move {
        if stopping_rx.await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => {
            tracing::warn!(grace_seconds = grace.as_secs(), "In-flight requests did not finish in time");
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
