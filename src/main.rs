use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use civic_ledger::{
    api::{build_router, ApiState, SecurityMiddlewareConfig, SecurityState},
    config::{sanitize_for_logging, CivicConfig},
    notify::{HttpNotifier, LogNotifier, Notifier},
    DatabasePool,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = CivicConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check the CIVIC_* environment variables.");
        e
    })?;

    init_secure_logging(&config)?;

    info!("Starting civic ledger server");
    info!(
        "Security settings: Auth enabled: {}, Rate limit: {}/min",
        config.security.enable_auth, config.security.rate_limit_per_minute
    );

    let db = Arc::new(
        DatabasePool::connect(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to open database")?,
    );
    db.run_migrations().await.context("Failed to migrate database")?;

    let notifier: Arc<dyn Notifier> = match config.http_notifier() {
        Some(settings) => {
            info!(
                "Email notifier: {} (key {})",
                settings.endpoint,
                sanitize_for_logging(&settings.api_key)
            );
            Arc::new(HttpNotifier::new(settings).context("Failed to create email notifier")?)
        }
        None => {
            warn!("No email endpoint configured - notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let state = ApiState::new(db.clone(), notifier, config.points.clone());
    let security_state = SecurityState::new(SecurityMiddlewareConfig::from_config(&config));

    // Drop stale rate limit windows
    let limiter = security_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(120));
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });

    let app = build_router(state, security_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Civic ledger listening on {}", bind_addr);
    info!(
        "Security middleware: Auth={}, Rate limit={}/min, Max body={}KB",
        config.security.enable_auth,
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    // Serve with connect info for client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    db.close().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize logging at the configured level
fn init_secure_logging(config: &CivicConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Secure logging initialized with data sanitization enabled");
    }

    Ok(())
}
