use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rembg_server::{create_app, AppState, Config, Model};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rembg_server=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    ensure!(
        config.model_path.exists(),
        "Model path does not exist: {}",
        config.model_path.display()
    );
    ensure!(config.max_upload_mb > 0, "MAX_UPLOAD_MB must be positive");
    ensure!(config.max_dimension > 0, "MAX_DIMENSION must be positive");

    let model_path = config.model_path.clone();
    let (num_threads, device_id) = (config.num_threads, config.device_id);
    let model = tokio::task::spawn_blocking(move || Model::new(&model_path, num_threads, device_id))
        .await
        .context("Model loader panicked")?
        .context("Failed to load segmentation model")?;

    let limits = config.limits();
    let cors_origins = config.cors_origins();
    tracing::info!(
        max_upload_mb = limits.max_upload_mb,
        max_dimension = limits.max_dimension,
        ?cors_origins,
        "configuration loaded"
    );

    let app = create_app(AppState::new(Arc::new(model), limits), &cors_origins);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
