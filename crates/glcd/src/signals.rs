//! Signal handling for graceful hub shutdown.
//!
//! The first termination signal starts a graceful shutdown; the application
//! listens again so a second one can force the process out.

use tokio::signal;
use tracing::info;

/// Waits for a termination signal and logs it.
///
/// # Platform Support
///
/// * **Unix platforms**: Handles SIGINT, SIGTERM and SIGHUP
/// * **Windows**: Handles Ctrl+C
///
/// # Returns
///
/// `Ok(())` once a signal arrived, or an error if the handlers could not be
/// installed.
pub async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    let name = wait_for_shutdown_silent().await?;
    info!(signal = name, "📡 Received shutdown signal - initiating graceful shutdown");
    Ok(())
}

/// Waits for a termination signal and returns its name without logging.
pub async fn wait_for_shutdown_silent() -> Result<&'static str, Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = sighup.recv() => "SIGHUP",
        };
        Ok(name)
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        Ok("CTRL_C")
    }
}
