//! Signal Handler: process-level shutdown.
//!
//! Waits on `SIGTERM`/`SIGINT` via `tokio::select!`, then broadcasts a
//! single shutdown signal through a [`CancellationToken`] rather than a
//! one-shot channel, since every live [`crate::session::Session`] already
//! derives a child token from the same source to drive its own teardown. A
//! second signal received while sessions are still draining forces an
//! immediate process exit rather than waiting for them.

use anyhow::Result;
use std::process;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Install the `SIGTERM`/`SIGINT` handlers, propagating the OS error instead
/// of panicking if registration fails. Called from [`crate::server::Server`]
/// with `?` before the handlers are handed to [`wait_for_shutdown`].
pub fn install() -> Result<(Signal, Signal)> {
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;
    Ok((sigterm, sigint))
}

/// Wait for the process's first shutdown signal on the already-installed
/// `sigterm`/`sigint` streams, then cancel `token` so the listener stops
/// accepting new upgrades and every live session begins teardown. Returns as
/// soon as `token` is cancelled so `axum`'s graceful shutdown starts
/// immediately rather than waiting on this future to keep handling signals;
/// a second signal arriving while sessions are still draining is handled by
/// a sibling task and forces an immediate exit.
pub async fn wait_for_shutdown(token: CancellationToken, mut sigterm: Signal, mut sigint: Signal) {
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, draining sessions"),
        _ = sigint.recv() => info!("received SIGINT, draining sessions"),
    }

    token.cancel();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        info!("received second signal during shutdown, forcing immediate exit");
        process::exit(1);
    });
}
