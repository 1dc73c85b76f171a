//! Discovery of PCI functions bound to the vfio-pci driver.
//!
//! ```text
//! /sys/bus/pci/drivers/vfio-pci/
//! ├── 0000:01:00.0 -> ../../../../devices/pci0000:00/0000:00:01.0/0000:01:00.0
//! │   ├── vendor        "0x10de"
//! │   ├── device        "0x2204"
//! │   └── iommu_group -> ../../../../kernel/iommu_groups/42
//! ├── bind, unbind, new_id, ...   (ignored)
//! /dev/vfio/42                    (must exist)
//! ```
//!
//! Only symlinks whose name is a full PCI address are considered. A device is
//! advertised only when its IOMMU group has a VFIO device node.

mod device;
mod scanner;

pub use device::{bridge_domain_path, is_valid_pci_address, slug_for_address, PciDeviceDescriptor};
pub use scanner::DeviceScanner;
