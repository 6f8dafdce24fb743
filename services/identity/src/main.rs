use anyhow::{Context, Result};
use identity_service::{
    start_api_server, AppState, Config, IdGenerator, IdentityService, ImageStorage,
    PgIdentityStore, QrBuilder, S3Uploader,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting identity registration service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let identity_store = PgIdentityStore::new(&config.database)
        .await
        .context("Failed to initialize identity store")?;

    if config.database.ensure_schema {
        identity_store
            .ensure_schema()
            .await
            .context("Failed to ensure identity schema")?;
    }

    let s3_uploader = S3Uploader::new(&config.s3)
        .await
        .context("Failed to initialize S3 uploader")?;

    let images = ImageStorage::new(Arc::new(s3_uploader), config.upload.clone());
    let ids = IdGenerator::from_config(&config.identifier)
        .context("Invalid identifier configuration")?;

    let identity_service = IdentityService::new(
        Arc::new(identity_store),
        images,
        ids,
        QrBuilder::new(&config.qr),
        config.registration.clone(),
    );

    let api_state = AppState {
        identity_service: Arc::new(identity_service),
    };

    info!("Identity service started successfully");

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Identity service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down identity service");
}
