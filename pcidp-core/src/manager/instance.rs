//! One advertised device and the server currently serving it.

use crate::paths::RESOURCE_PREFIX;
use crate::pci::PciDeviceDescriptor;
use crate::plugin::PluginServer;
use std::fmt;
use std::path::{Path, PathBuf};

/// A discovered device bound to its resource name and socket.
pub struct Instance {
    device: PciDeviceDescriptor,
    resource_name: String,
    socket_path: PathBuf,
    /// Server started by the current restart cycle, if any
    pub(crate) server: Option<Box<dyn PluginServer>>,
}

impl Instance {
    pub fn new(device: PciDeviceDescriptor, device_plugin_dir: &Path) -> Self {
        let resource_name = format!("{}{}", RESOURCE_PREFIX, device.slug);
        let socket_path = device_plugin_dir.join(socket_file_name(&resource_name));
        Self { device, resource_name, socket_path, server: None }
    }

    pub fn device(&self) -> &PciDeviceDescriptor {
        &self.device
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("device", &self.device)
            .field("resource_name", &self.resource_name)
            .field("socket_path", &self.socket_path)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Socket file name for a resource: "pci/dev-x" -> "pci-dev-x.sock".
pub fn socket_file_name(resource_name: &str) -> String {
    format!("{}.sock", resource_name.replace('/', "-"))
}

/// Inverse of [`socket_file_name`] for resource names that contain no '-'.
pub fn resource_name_from_socket_file(file_name: &str) -> Option<String> {
    file_name.strip_suffix(".sock").map(|stem| stem.replace('-', "/"))
}
