//! Shared shutdown-signal future for every upstream transport. SIGINT,
//! SIGTERM, and (stdio only) SIGHUP are graceful-shutdown triggers; stdin
//! EOF is handled separately by the stdio transport since it isn't a signal.

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::info;

/// Resolves on the first SIGINT, SIGTERM, or SIGHUP. Intended to be raced
/// against a transport's own completion future with `tokio::select!`.
pub async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install SIGHUP handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sighup.recv() => info!("received SIGHUP"),
    }
}
