//! Graceful shutdown signal handler. Listens for SIGINT (Ctrl+C) or SIGTERM.

use tokio::signal;
use tracing::info;

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("received SIGTERM signal, initiating graceful shutdown...");
        },
    }

    info!("draining active streams and closing connections...");
}
