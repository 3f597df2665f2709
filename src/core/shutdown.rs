//! # OS termination signals for [`Engine::run`](crate::Engine::run).
//!
//! - unix: `SIGINT`, `SIGTERM` (systemd, Kubernetes), `SIGQUIT`
//! - elsewhere: Ctrl-C

/// Resolves on the first termination signal.
///
/// Fails only if a signal handler could not be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Resolves on the first termination signal.
///
/// Fails only if a signal handler could not be installed.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
