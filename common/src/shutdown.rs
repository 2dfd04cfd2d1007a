use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returns a token that is cancelled on SIGTERM or SIGINT. Must be called
/// from inside a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

/// Sleeps for `period` unless shutdown is requested first. Returns `true`
/// when the caller should stop.
pub async fn wait_or_shutdown(token: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(period) => token.is_cancelled(),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("cannot listen for SIGTERM: {err}");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for SIGINT: {err}");
            }
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received SIGINT, shutting down"),
            Err(err) => warn!("cannot listen for SIGINT: {err}"),
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt, shutting down"),
        Err(err) => warn!("cannot listen for interrupt: {err}"),
    }
}
