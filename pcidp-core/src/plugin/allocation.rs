//! Allocation response construction.
//!
//! An allocation never touches the device: it only tells the kubelet which
//! host paths to expose to the container. The kubelet and the container
//! runtime do the cgroup and mount wiring.

use crate::config::Config;
use crate::paths;
use crate::pci::{bridge_domain_path, PciDeviceDescriptor};
use pcidp_api::v1beta1::{ContainerAllocateResponse, DeviceSpec};
use std::collections::HashMap;

/// cgroup permissions granted on every exposed path.
pub const DEVICE_PERMISSIONS: &str = "mrw";

/// Prefix of the environment variable carrying the allocated PCI address.
pub const ENV_PREFIX: &str = "PCI_RESOURCE_";

/// Everything a container receives when it is allocated one device.
#[derive(Debug, Clone)]
pub struct DeviceAllocation {
    address: String,
    env_name: String,
    specs: Vec<DeviceSpec>,
}

impl DeviceAllocation {
    pub fn new(device: &PciDeviceDescriptor, resource_name: &str, config: &Config) -> Self {
        let group = device.iommu_group.to_string();
        let host_paths = [
            config.vfio_dev_dir.join(paths::VFIO_CONTROL_NODE).to_string_lossy().to_string(),
            config.vfio_dev_dir.join(&group).to_string_lossy().to_string(),
            format!("{}/{}", paths::PCI_DEVICES_PATH, device.address),
            config.driver_dir.join(&device.address).to_string_lossy().to_string(),
            format!("{}/{}", paths::IOMMU_GROUPS_PATH, group),
            bridge_domain_path(&device.address),
        ];

        Self {
            address: device.address.clone(),
            env_name: format_env_name(&format!("{}{}", ENV_PREFIX, resource_name)),
            specs: host_paths.into_iter().map(passthrough_spec).collect(),
        }
    }

    pub fn device_specs(&self) -> &[DeviceSpec] {
        &self.specs
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// Response for a single container request.
    ///
    /// The same grants are returned whichever device ids were requested, since
    /// one server only ever owns one device.
    pub fn container_response(&self) -> ContainerAllocateResponse {
        ContainerAllocateResponse {
            envs: HashMap::from([(self.env_name.clone(), self.address.clone())]),
            devices: self.specs.clone(),
            ..Default::default()
        }
    }
}

/// Expose a host path at the same location inside the container.
fn passthrough_spec(path: String) -> DeviceSpec {
    DeviceSpec {
        container_path: path.clone(),
        host_path: path,
        permissions: DEVICE_PERMISSIONS.to_string(),
    }
}

/// Turn an arbitrary string into an environment variable name.
///
/// ASCII letters are uppercased; digits, '_' and '-' are kept (KubeVirt looks
/// the variable up with hyphens intact); everything else becomes '_'.
pub fn format_env_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => c.to_ascii_uppercase(),
            _ => '_',
        })
        .collect()
}
