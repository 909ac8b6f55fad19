//! Signal handling for the service

use std::fmt;

use tracing::warn;

/// Signal that ended the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolve on Ctrl+C, or SIGTERM where available
///
/// If the Ctrl+C handler cannot be installed only SIGTERM is awaited, and
/// the other way round; with neither this never resolves.
pub async fn wait_for_shutdown() -> ShutdownSignal {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => ShutdownSignal::Interrupt,
        _ = terminate() => ShutdownSignal::Terminate,
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        },
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        },
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
