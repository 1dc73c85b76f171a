//! Instance lifecycle and the restart state machine.
//!
//! ```text
//!              all instances started
//!   NeedsStart ─────────────────────────► Running
//!     │  ▲  ▲                               │
//!     │  │  └──── kubelet.sock created ─────┤
//!     │  │        or SIGHUP                  │
//!     │  └─ start failed (retry after backoff)
//!     │                                      │
//!     └──────── SIGINT / SIGTERM / SIGQUIT ──┴──► ShuttingDown (terminal)
//! ```
//!
//! Every restart attempt stops all instances first, then starts them one by
//! one in discovery order. The first failure aborts the attempt.
//!
//! The manager is owned by the control loop alone. Servers never touch it;
//! the only thing flowing back from a server is its stop signal to its own
//! streams.

mod backoff;
mod instance;

pub use backoff::RestartBackoff;
pub use instance::{resource_name_from_socket_file, socket_file_name, Instance};

use crate::error::{PluginError, Result};
use crate::observability::metrics;
use crate::pci::PciDeviceDescriptor;
use crate::plugin::{cleanup_socket, PluginLauncher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// State of the restart state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    /// Every instance must be (re)started
    NeedsStart,
    /// Every instance is serving and registered
    Running,
    /// Terminal: stop everything and leave the control loop
    ShuttingDown,
}

/// Notifications from the host that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The kubelet registration socket was (re)created: kubelet restarted
    RegistrationSocketCreated,
    /// The socket directory watch reported an error
    WatchError(String),
    /// Reload requested (SIGHUP)
    Reload,
    /// Termination requested by the named signal
    Terminate(&'static str),
}

impl HostEvent {
    /// Whether the event asks for every instance to be restarted.
    pub fn triggers_restart(&self) -> bool {
        matches!(self, HostEvent::RegistrationSocketCreated | HostEvent::Reload)
    }
}

/// Owns all instances and restarts them as a whole.
pub struct InstanceManager {
    instances: Vec<Instance>,
    launcher: Arc<dyn PluginLauncher>,
    backoff: RestartBackoff,
    state: RestartState,
}

impl InstanceManager {
    pub fn new(
        instances: Vec<Instance>,
        launcher: Arc<dyn PluginLauncher>,
        backoff: RestartBackoff,
    ) -> Self {
        Self { instances, launcher, backoff, state: RestartState::NeedsStart }
    }

    /// One instance per discovered device, names and sockets precomputed.
    pub fn build_instances(
        devices: Vec<PciDeviceDescriptor>,
        device_plugin_dir: &Path,
    ) -> Vec<Instance> {
        devices.into_iter().map(|device| Instance::new(device, device_plugin_dir)).collect()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn state(&self) -> RestartState {
        self.state
    }

    /// Create, start and register a fresh server for one instance.
    pub async fn start_instance(&mut self, index: usize) -> Result<()> {
        let launcher = Arc::clone(&self.launcher);
        let count = self.instances.len();
        let instance = self
            .instances
            .get_mut(index)
            .ok_or(PluginError::UnknownInstance { index, count })?;

        let mut server = launcher.launch(instance);
        server.serve().await?;
        instance.server = Some(server);
        Ok(())
    }

    /// Stop every running server and remove every socket file.
    ///
    /// All instances are attempted; the first error is returned afterwards.
    pub async fn stop_instances(&mut self) -> Result<()> {
        let mut first_error = None;

        for instance in &mut self.instances {
            if let Some(mut server) = instance.server.take() {
                if let Err(e) = server.stop().await {
                    warn!(resource = %instance.resource_name(), "Failed to stop server: {}", e);
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = cleanup_socket(instance.socket_path()) {
                warn!(resource = %instance.resource_name(), "Failed to remove socket: {}", e);
                first_error.get_or_insert(e);
            }
        }

        metrics::set_instances_running(0);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One full restart attempt: stop everything, then start in order.
    ///
    /// Stops at the first instance that fails; the state stays `NeedsStart`.
    pub async fn restart(&mut self) -> Result<()> {
        metrics::record_restart_attempt();

        if let Err(e) = self.stop_instances().await {
            warn!("Errors while stopping instances: {}", e);
        }

        for index in 0..self.instances.len() {
            if let Err(e) = self.start_instance(index).await {
                warn!(
                    resource = %self.instances[index].resource_name(),
                    "Failed to start instance, retrying: {}", e
                );
                metrics::record_restart_failure();
                return Err(e);
            }
            metrics::set_instances_running(index + 1);
        }

        self.state = RestartState::Running;
        info!(instances = self.instances.len(), "All device plugin instances running");
        Ok(())
    }

    /// Apply a host event to the state machine.
    pub fn handle_event(&mut self, event: HostEvent) {
        if self.state == RestartState::ShuttingDown {
            return;
        }

        match event {
            HostEvent::RegistrationSocketCreated => {
                info!("inotify: kubelet socket created, restarting");
                self.state = RestartState::NeedsStart;
            }
            HostEvent::Reload => {
                info!("Received SIGHUP, restarting");
                self.state = RestartState::NeedsStart;
            }
            HostEvent::WatchError(e) => error!("inotify: {}", e),
            HostEvent::Terminate(signal) => {
                info!("Received signal {}, shutting down", signal);
                self.state = RestartState::ShuttingDown;
            }
        }
    }

    /// Control loop: keep every instance running until told to shut down.
    ///
    /// After a failed attempt the next one waits for the backoff deadline.
    /// Only a restart trigger (kubelet socket created or reload) cuts the wait
    /// short; other events leave the deadline in place.
    ///
    /// Returns after all instances have been stopped, either on a termination
    /// event or when every event sender is gone.
    pub async fn run(&mut self, mut events: mpsc::Receiver<HostEvent>) -> Result<()> {
        let mut retry_at: Option<Instant> = None;

        loop {
            let due = retry_at.map_or(true, |at| Instant::now() >= at);
            if self.state == RestartState::NeedsStart && due {
                match self.restart().await {
                    Ok(()) => {
                        self.backoff.reset();
                        retry_at = None;
                    }
                    Err(_) => retry_at = Some(Instant::now() + self.backoff.next_delay()),
                }
            }

            let event = match retry_at {
                Some(at) if self.state == RestartState::NeedsStart => tokio::select! {
                    biased;
                    event = events.recv() => event,
                    _ = tokio::time::sleep_until(at) => continue,
                },
                _ => events.recv().await,
            };

            match event {
                Some(event) => {
                    if event.triggers_restart() {
                        retry_at = None;
                    }
                    self.handle_event(event);
                }
                None => {
                    warn!("Host event channel closed, shutting down");
                    self.state = RestartState::ShuttingDown;
                }
            }

            if self.state == RestartState::ShuttingDown {
                let result = self.stop_instances().await;
                info!("All device plugin instances stopped");
                return result;
            }
        }
    }
}
