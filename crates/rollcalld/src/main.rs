use anyhow::{Context, Result};
use rollcall_store::{FsObjectStore, SqliteStore};
use rollcalld::config::Config;
use rollcalld::engine::{self, EngineStores};
use rollcalld::{build_router, AppState};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    tracing::info!(
        listen = %config.listen,
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        photos = %config.photo_dir.display(),
        "rollcalld starting"
    );

    let db = Arc::new(SqliteStore::open(&config.db_path)?);
    let photos = Arc::new(FsObjectStore::new(&config.photo_dir));

    let models = engine::load_models(
        &config.detector_model_path(),
        &config.embedder_model_path(),
        config.intra_threads,
    );
    let handle = engine::spawn_engine(
        models,
        EngineStores {
            photos: photos.clone(),
            profiles: db.clone(),
            ledger: db.clone(),
        },
    )?;

    let app = build_router(AppState::new(handle, photos, db));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
