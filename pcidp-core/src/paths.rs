//! Well-known host paths used by pci-dp.
//!
//! Everything that can differ between hosts is overridable through
//! [`Config`](crate::config::Config); these are the defaults and the paths the
//! kernel fixes.

/// Directory holding one symlink per device bound to the vfio-pci driver.
pub const VFIO_PCI_DRIVER_PATH: &str = "/sys/bus/pci/drivers/vfio-pci";

/// Directory holding VFIO group device nodes.
pub const VFIO_DEV_PATH: &str = "/dev/vfio";

/// Name of the VFIO container control node inside [`VFIO_DEV_PATH`].
pub const VFIO_CONTROL_NODE: &str = "vfio";

/// Kubelet device plugin directory.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";

/// Kubelet registration socket name inside [`DEVICE_PLUGIN_PATH`].
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";

/// Sysfs PCI device directory.
pub const PCI_DEVICES_PATH: &str = "/sys/bus/pci/devices";

/// Sysfs IOMMU group directory.
pub const IOMMU_GROUPS_PATH: &str = "/sys/kernel/iommu_groups";

/// Sysfs device tree root; PCI root bridges live at `<root>/pci<domain:bus>`.
pub const SYS_DEVICES_PATH: &str = "/sys/devices";

/// Prefix of every resource name advertised to the kubelet.
pub const RESOURCE_PREFIX: &str = "pci/dev-";
