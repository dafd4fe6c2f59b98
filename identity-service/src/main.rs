use identity_service::{
    build_router,
    config::{Environment, IdentityConfig},
    db,
    services::{
        store::{MemoryStore, PgStore, Store},
        EmailProvider, EmailQueue, EmailService, MembershipCache, MockEmailService, RedisService,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    if let Err(e) = init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    ) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity server"
    );

    let store: Arc<dyn Store> = match &config.database {
        Some(database) => {
            let pool = db::connect(database).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let membership_cache: Option<Arc<dyn MembershipCache>> = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisService::new(redis).await.map_err(AppError::InternalError)?,
        )),
        None => {
            tracing::info!("REDIS_URL not set, membership cache disabled");
            None
        }
    };

    let email: Arc<dyn EmailProvider> = match (&config.smtp, &config.environment) {
        (Some(smtp), _) => Arc::new(EmailService::new(smtp)?),
        (None, Environment::Dev) => {
            tracing::warn!("SMTP_HOST not set, emails are kept in memory and not delivered");
            Arc::new(MockEmailService::new())
        }
        (None, Environment::Prod) => {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_HOST is required in production but not set"
            )));
        }
    };
    let (emails, email_worker) =
        EmailQueue::start(email, config.email_queue_capacity, config.base_url.clone());

    let addr = config.common.socket_addr();
    let state = AppState::new(config, store, membership_cache, emails);
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last queue senders; the worker drains what is left.
    if let Err(e) = email_worker.await {
        tracing::error!(error = %e, "Email worker failed");
    }
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
