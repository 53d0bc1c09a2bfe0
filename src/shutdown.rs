use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on SIGINT, or on SIGTERM where available.
pub fn spawn_signal_handlers(token: CancellationToken) {
    #[cfg(unix)]
    {
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM signal");
                            sigterm_token.cancel();
                        }
                        _ = sigterm_token.cancelled() => {}
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    token.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            },
            _ = token.cancelled() => {}
        }
    });
}
