//! vfio-pci driver directory scanner.

use crate::config::Config;
use crate::error::{PluginError, Result};
use crate::pci::device::{is_valid_pci_address, PciDeviceDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Trailing IOMMU group number of an `iommu_group` link target.
static IOMMU_GROUP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)$").expect("Invalid IOMMU group regex"));

/// Scans the vfio-pci driver directory for devices that can be passed through.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    driver_dir: PathBuf,
    vfio_dev_dir: PathBuf,
}

impl DeviceScanner {
    pub fn new(driver_dir: impl Into<PathBuf>, vfio_dev_dir: impl Into<PathBuf>) -> Self {
        Self { driver_dir: driver_dir.into(), vfio_dev_dir: vfio_dev_dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.driver_dir, &config.vfio_dev_dir)
    }

    /// Enumerate all usable devices.
    ///
    /// Candidates that cannot be read are logged and skipped. Only a failure to
    /// list the driver directory itself is an error. Results keep directory
    /// iteration order.
    pub fn scan(&self) -> Result<Vec<PciDeviceDescriptor>> {
        let entries = fs::read_dir(&self.driver_dir)
            .map_err(|e| PluginError::ScanFailed { path: self.driver_dir.clone(), source: e })?;

        let mut addresses = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.driver_dir.display(), "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();

            let is_symlink = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);
            if is_symlink && is_valid_pci_address(&name) {
                addresses.push(name);
            } else {
                debug!(entry = %name, "Ignoring driver directory entry");
            }
        }

        let mut devices = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.read_device(&address) {
                Ok(device) => {
                    info!(
                        address = %device.address,
                        vendor = %device.vendor_id,
                        device = %device.device_id,
                        iommu_group = device.iommu_group,
                        "Found PCI device"
                    );
                    devices.push(device);
                }
                Err(e) => warn!(address = %address, "Skipping PCI device: {}", e),
            }
        }

        Ok(devices)
    }

    /// Read the attributes of one candidate.
    fn read_device(&self, address: &str) -> Result<PciDeviceDescriptor> {
        let device_path = self.driver_dir.join(address);

        let vendor_id = read_hex_id(&device_path.join("vendor"))?;
        let device_id = read_hex_id(&device_path.join("device"))?;

        let group_link = device_path.join("iommu_group");
        let target = fs::read_link(&group_link)
            .map_err(|e| PluginError::IoError { path: group_link.clone(), source: e })?;
        let iommu_group = parse_iommu_group(&target).ok_or_else(|| PluginError::InvalidDevice {
            address: address.to_string(),
            reason: format!("cannot parse IOMMU group from {}", target.display()),
        })?;

        // Only a missing node rules the device out
        let group_node = self.vfio_dev_dir.join(iommu_group.to_string());
        match fs::metadata(&group_node) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PluginError::InvalidDevice {
                    address: address.to_string(),
                    reason: format!("VFIO group node {} does not exist", group_node.display()),
                });
            }
            Err(e) => warn!(node = %group_node.display(), "Cannot stat VFIO group node: {}", e),
        }

        Ok(PciDeviceDescriptor::new(address, &vendor_id, &device_id, iommu_group))
    }
}

/// Read a sysfs id file such as `vendor` ("0x10de\n") and drop the 0x prefix.
fn read_hex_id(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .map_err(|e| PluginError::IoError { path: path.to_path_buf(), source: e })?;
    let value = content.trim();
    Ok(value.strip_prefix("0x").unwrap_or(value).to_string())
}

/// Extract the group number from an `iommu_group` link target.
fn parse_iommu_group(target: &Path) -> Option<u32> {
    let target = target.to_string_lossy();
    IOMMU_GROUP_REGEX.captures(&target).and_then(|c| c[1].parse().ok())
}
