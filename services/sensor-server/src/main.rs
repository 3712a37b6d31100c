use std::sync::Arc;

use anyhow::{Context, Result};
use sensor_server::build_router;
use sensor_server::config::ServerConfig;
use sensor_server::handlers::AppState;
use sensor_server::ingest::Ingestor;
use sensor_server::query::QueryService;
use sensor_server::session;
use sensor_server::store::{FileReadingStore, MemoryReadingStore, ReadingStore};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    eprintln!("[sensor-server] booting...");

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    let store: Arc<dyn ReadingStore> = match &config.store_path {
        Some(path) => Arc::new(
            FileReadingStore::open(path)
                .await
                .with_context(|| format!("failed to open reading log at {}", path.display()))?,
        ),
        None => {
            tracing::info!("READINGS_STORE_PATH not set; readings are kept in memory only");
            Arc::new(MemoryReadingStore::new())
        }
    };

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&store),
        config.default_bin_id.clone(),
    ));
    let session = session::start(&config.mqtt, ingestor)
        .await
        .context("mqtt connect/subscribe failed")?;

    let state = Arc::new(AppState {
        queries: QueryService::new(store),
        session: session.state(),
    });
    let app = build_router(state);

    tracing::info!("sensor-server http listening on http://{}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.close().await;
    tracing::info!("sensor-server shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
    let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
