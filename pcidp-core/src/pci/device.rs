//! PCI device descriptor and address helpers.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Regular expression to validate a vfio-pci driver entry: 0000:01:00.0
static PCI_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{4}:[0-9a-f]{2}:[0-9a-f]{2}\.[0-9]$").expect("Invalid PCI address regex")
});

/// A PCI function bound to vfio-pci and usable for passthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDeviceDescriptor {
    /// PCI address (e.g., "0000:01:00.0")
    pub address: String,
    /// Vendor ID without the 0x prefix (e.g., "10de")
    pub vendor_id: String,
    /// Device ID without the 0x prefix (e.g., "2204")
    pub device_id: String,
    /// IOMMU group ID
    pub iommu_group: u32,
    /// Address with ':' and '.' replaced by '-', safe for file names
    pub slug: String,
}

impl PciDeviceDescriptor {
    pub fn new(address: &str, vendor_id: &str, device_id: &str, iommu_group: u32) -> Self {
        Self {
            address: address.to_string(),
            vendor_id: vendor_id.to_string(),
            device_id: device_id.to_string(),
            iommu_group,
            slug: slug_for_address(address),
        }
    }
}

impl fmt::Display for PciDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] group {}",
            self.address, self.vendor_id, self.device_id, self.iommu_group
        )
    }
}

/// Validate PCI address format.
pub fn is_valid_pci_address(address: &str) -> bool {
    PCI_ADDRESS_REGEX.is_match(address)
}

/// Derive the file-name-safe slug of an address: "0000:00:1f.0" -> "0000-00-1f-0".
pub fn slug_for_address(address: &str) -> String {
    address.replace([':', '.'], "-")
}

/// Sysfs directory of the PCI root bridge domain a device sits under.
///
/// The function-level component is dropped from the address, so
/// "0000:00:1f.0" maps to "/sys/devices/pci0000:00".
pub fn bridge_domain_path(address: &str) -> String {
    let domain_bus = match address.rsplit_once(':') {
        Some((prefix, _)) => prefix,
        None => address,
    };
    format!("{}/pci{}", crate::paths::SYS_DEVICES_PATH, domain_bus)
}
