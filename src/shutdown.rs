//! Signal-driven cancellation shared by every long-running task.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returns a token cancelled on the first SIGTERM or Ctrl-C.
///
/// When a signal stream cannot be installed the other one still works; if
/// neither can, the token is only cancelled by its owner.
#[must_use]
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            () = terminate() => info!("received SIGTERM, shutting down"),
            () = interrupt() => info!("received interrupt, shutting down"),
        }
        trigger.cancel();
    });

    token
}

async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(%err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
