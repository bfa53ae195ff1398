//! Interrupt handling for SIGTERM and SIGINT.
//!
//! A signal cancels the run's token. The pipeline checks the token between
//! keys and stops with [`BackupError::Interrupted`](crate::BackupError).

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct InterruptHandler {
    token: CancellationToken,
}

impl InterruptHandler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token the pipeline polls for cancellation
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping after the current key...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping after the current key...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    /// Listen for signals in the background until the token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.wait_for_signal().await })
    }
}

impl Default for InterruptHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let handler = InterruptHandler::new();
        let token = handler.token();
        let handle = handler.spawn();

        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }
}
