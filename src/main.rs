use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};
use volinit::config::Config;

/// Entry point of the `volinit` service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Setup default logging level
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish()
        .try_init()?;

    if !config.volume_path.is_dir() {
        tracing::warn!(
            path = %config.volume_path.display(),
            "volume root does not exist yet, uploads will fail until it does"
        );
    }

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    tracing::info!(
        listen = %config.listen,
        volume_path = %config.volume_path.display(),
        volume_filename = %config.volume_filename,
        root_marker_aware = !config.no_root_marker,
        "serving volume uploads"
    );

    let app = volinit::server::router(Arc::new(config));
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
