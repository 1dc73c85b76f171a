//! Kubelet device plugin servers.
//!
//! One server owns one Unix socket under the kubelet device plugin directory
//! and advertises exactly one PCI device under its own resource name.
//!
//! The lifecycle manager only talks to servers through [`PluginServer`] and
//! creates them through a [`PluginLauncher`], so tests can swap in servers that
//! never touch a socket.

mod allocation;
mod dial;
mod server;
mod service;

pub use allocation::{format_env_name, DeviceAllocation, DEVICE_PERMISSIONS, ENV_PREFIX};
pub use dial::dial;
pub use server::{GrpcPluginLauncher, PciPluginServer};
pub use service::PciDevicePlugin;

use crate::error::{PluginError, Result};
use crate::manager::Instance;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// A device plugin server the lifecycle manager can run.
#[async_trait]
pub trait PluginServer: Send + Sync {
    /// Start serving and register with the kubelet.
    ///
    /// On failure nothing is left listening on the socket.
    async fn serve(&mut self) -> Result<()>;

    /// Stop serving and remove the socket. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    /// Socket the server listens on.
    fn socket_path(&self) -> &Path;
}

/// Creates a fresh server for an instance on every (re)start.
pub trait PluginLauncher: Send + Sync {
    fn launch(&self, instance: &Instance) -> Box<dyn PluginServer>;
}

/// Remove a socket file, treating an already absent file as success.
pub fn cleanup_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(socket = %path.display(), "Removed socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PluginError::IoError { path: path.to_path_buf(), source: e }),
    }
}
