//! pci-dp core library
//!
//! Discovery of vfio-pci bound devices, the kubelet device plugin server for
//! each of them, and the lifecycle manager that keeps them registered.

pub mod config;
pub mod error;
pub mod manager;
pub mod observability;
pub mod paths;
pub mod pci;
pub mod plugin;

// Re-export commonly used items
pub use config::Config;
pub use error::{PluginError, Result};
pub use manager::{HostEvent, Instance, InstanceManager, RestartBackoff, RestartState};
pub use observability::init as init_observability;
pub use pci::{DeviceScanner, PciDeviceDescriptor};
pub use plugin::{GrpcPluginLauncher, PluginLauncher, PluginServer};
