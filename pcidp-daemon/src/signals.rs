//! OS signal delivery.
//!
//! - **SIGHUP**: restart every instance
//! - **SIGINT**, **SIGTERM**, **SIGQUIT**: stop every instance and exit

use pcidp_core::HostEvent;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Install signal handlers and forward signals as [`HostEvent`]s.
///
/// Handlers are registered before this returns, so a signal arriving right
/// after startup is not lost. The task ends after forwarding a termination.
pub fn spawn_signal_listener(tx: mpsc::Sender<HostEvent>) -> std::io::Result<JoinHandle<()>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    info!("Signal handlers installed (SIGHUP, SIGINT, SIGTERM, SIGQUIT)");

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = sighup.recv() => HostEvent::Reload,
                _ = sigint.recv() => HostEvent::Terminate("SIGINT"),
                _ = sigterm.recv() => HostEvent::Terminate("SIGTERM"),
                _ = sigquit.recv() => HostEvent::Terminate("SIGQUIT"),
            };
            let terminal = matches!(event, HostEvent::Terminate(_));
            if tx.send(event).await.is_err() || terminal {
                break;
            }
        }
    }))
}
