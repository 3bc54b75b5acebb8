//! Main entry point for the illustration gateway

use illust_gateway::{api, config::Settings, pipeline::Pipeline, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }

    info!("Starting illustration gateway");
    info!(
        "Loaded configuration: server={}:{}, backend={}, image_host={}",
        settings.server.host,
        settings.server.port,
        settings.backend.base_url(),
        settings.image_host.base_url()
    );

    let pipeline = Arc::new(Pipeline::from_settings(&settings)?);
    pipeline.start();

    let app_state = Arc::new(AppState {
        settings: Arc::new(settings.clone()),
        pipeline: pipeline.clone(),
        http_client: reqwest::Client::new(),
    });

    // Build the router
    let app = api::create_router(app_state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down worker and backend");
    pipeline.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
