// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown: a signal-driven [`CancellationToken`] and a bounded
//! drain of in-flight dispatches so their usage records reach the ledger.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;

/// Cancels the returned token on SIGINT (Ctrl+C) or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                        _ = signalled.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = signalled.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, shutting down"),
                _ = signalled.cancelled() => return,
            }
        }

        signalled.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Wait up to `timeout` for in-flight dispatches to finish.
///
/// Returns `true` when everything drained.
pub async fn drain(dispatcher: &Dispatcher, timeout: Duration) -> bool {
    let pending = dispatcher.in_flight();
    if pending == 0 {
        debug!("no in-flight dispatches to drain");
        return true;
    }

    info!(count = pending, "waiting for in-flight dispatches");
    match tokio::time::timeout(timeout, dispatcher.flush()).await {
        Ok(()) => {
            info!("all dispatches drained");
            true
        }
        Err(_) => {
            warn!(
                remaining = dispatcher.in_flight(),
                "drain timeout reached, abandoning in-flight dispatches"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_signal_handler_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
    }
}
