//! Engine entry point: boots the engine and runs until a shutdown signal.

use std::sync::Arc;

use dispatcher::LoggingNotifier;
use domain::InMemoryCatalog;
use runtime::{Config, Engine, RuntimeError, init_tracing, install_metrics_recorder};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    let config = Config::from_env();
    init_tracing(&config)?;
    let metrics = install_metrics_recorder()?;

    let engine = Engine::bootstrap(
        &config,
        Arc::new(InMemoryCatalog::new()),
        Arc::new(LoggingNotifier),
    )
    .await?;

    shutdown_signal().await;
    engine.shutdown().await?;

    tracing::debug!(metrics = %metrics.render(), "final metrics snapshot");
    Ok(())
}
