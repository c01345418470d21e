//! Stop signal for the consumer.
//!
//! SIGTERM or SIGINT cancels the returned token. The reader stops polling
//! the broker at its next loop boundary and the workers drain whatever is
//! already queued; no job in progress is interrupted.

use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(cancel_on(token.clone(), termination_signal()));
    token
}

/// Cancel `token` once `trigger` resolves, logging what caused the stop.
async fn cancel_on<F>(token: CancellationToken, trigger: F)
where
    F: Future<Output = &'static str>,
{
    let cause = trigger.await;
    info!(signal = cause, "Stop requested, draining queued jobs");
    token.cancel();
}

async fn termination_signal() -> &'static str {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cannot install signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return "SIGINT";
            }
        };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
