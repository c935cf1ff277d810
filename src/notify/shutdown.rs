use std::future::Future;
use std::io;
use tracing::info;

/// Install SIGINT and SIGTERM handlers now and return a future resolving on
/// the first of them.
///
/// Handlers are registered before this returns, so a signal arriving while
/// the caller is still busy (for example during the startup pass) is queued
/// for the future instead of terminating the process.
///
/// # Errors
///
/// Returns an error if a handler cannot be registered.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
    })
}

/// Install a Ctrl+C handler now and return a future resolving on it.
///
/// # Errors
///
/// Returns an error if the handler cannot be registered.
#[cfg(windows)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    Ok(async move {
        ctrl_c.recv().await;
        info!("Ctrl+C received");
    })
}
