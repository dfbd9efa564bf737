//! # OS shutdown signals for the binary.
//!
//! [`wait_for_shutdown_signal`] completes on `SIGINT` (Ctrl-C), `SIGTERM` or `SIGQUIT`
//! and returns the name of the signal received.

use tokio::signal::unix::{SignalKind, signal};

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners. Fails if registration fails.
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}
