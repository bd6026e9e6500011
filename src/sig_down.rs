//! Process shutdown signaling.
//!
//! Converts SIGTERM/SIGINT into a [`CancellationToken`] that the HTTP
//! server and the background loops watch. The first signal wins; repeated
//! signals are ignored once cancellation fired.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Shutdown signal handle.
pub struct SigDown {
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Register SIGTERM and SIGINT handlers.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let cancellation_token = CancellationToken::new();
        let trigger = cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
                _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
            }
            trigger.cancel();
        });
        Ok(Self { cancellation_token })
    }

    /// A token to hand to each subsystem that must stop on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
