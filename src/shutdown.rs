use tokio_util::sync::CancellationToken;

/// Why the top-level context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

/// Owner of the process-wide cancellation token. Every suspended RPC,
/// stream and readiness wait selects on a child of this token.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the token on the first SIGINT or SIGTERM.
    pub fn watch_signals(&self) -> tokio::task::JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            let reason = tokio::select! {
                reason = wait_ctrl_c() => reason,
                reason = wait_sigterm() => reason,
                _ = shutdown.token.cancelled() => return,
            };
            tracing::debug!(?reason, "cancelling in-flight calls");
            shutdown.cancel();
        })
    }
}

async fn wait_ctrl_c() -> ShutdownReason {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    ShutdownReason::Interrupt
}

#[cfg(unix)]
async fn wait_sigterm() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
    ShutdownReason::Terminate
}

#[cfg(not(unix))]
async fn wait_sigterm() -> ShutdownReason {
    std::future::pending::<()>().await;
    ShutdownReason::Terminate
}
