mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::config::{ConfigError, ServerConfig, SyncConfig};
use crate::services::auth::TokenVerifier;
use crate::store::postgres::PgWhiteboardStore;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "whiteboard-sync exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let server = ServerConfig::from_env()?;
    let sync = SyncConfig::from_env();
    tracing::info!(
        max_recent_strokes = sync.max_recent_strokes,
        persist_interval_ms = sync.persist_interval.as_millis(),
        stroke_flush_delay_ms = sync.stroke_flush_delay.as_millis(),
        "sync config loaded"
    );

    let pool = db::init_pool(&server.database_url).await?;
    let store = Arc::new(PgWhiteboardStore::new(pool.clone()));
    let state = state::AppState::new(store, TokenVerifier::new(&server.jwt_secret), sync);

    // Spawn background persistence task.
    let persistence = services::persistence::spawn_persistence_task(state.clone());

    let app = routes::app(state.clone(), server.frontend_origin.as_deref());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port)).await?;

    tracing::info!(port = server.port, "whiteboard-sync listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain buffered strokes and dirty state before the pool goes away.
    persistence.abort();
    let strokes = state.coalescer.flush_all().await;
    let states = services::persistence::sweep(&state).await;
    tracing::info!(strokes, states, "shutdown flush complete");
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
