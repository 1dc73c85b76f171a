//! Configuration management.

use crate::error::{PluginError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for pci-dp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub driver_dir: PathBuf,
    pub vfio_dev_dir: PathBuf,
    pub device_plugin_dir: PathBuf,
    pub kubelet_socket_name: String,
    pub readiness_timeout_secs: u64,
    pub registration_timeout_secs: u64,
    pub restart_backoff_initial_ms: u64,
    pub restart_backoff_max_ms: u64,
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver_dir: PathBuf::from(paths::VFIO_PCI_DRIVER_PATH),
            vfio_dev_dir: PathBuf::from(paths::VFIO_DEV_PATH),
            device_plugin_dir: PathBuf::from(paths::DEVICE_PLUGIN_PATH),
            kubelet_socket_name: paths::KUBELET_SOCKET_NAME.to_string(),
            readiness_timeout_secs: 60,
            registration_timeout_secs: 5,
            restart_backoff_initial_ms: 500,
            restart_backoff_max_ms: 30_000,
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, or defaults when no file is given.
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| PluginError::InvalidConfig {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            ("driver_dir", &self.driver_dir),
            ("vfio_dev_dir", &self.vfio_dev_dir),
            ("device_plugin_dir", &self.device_plugin_dir),
        ];
        for (name, dir) in dirs {
            if dir.as_os_str().is_empty() {
                return Err(PluginError::InvalidConfig {
                    reason: format!("{} must not be empty", name),
                });
            }
        }
        if self.kubelet_socket_name.is_empty() || self.kubelet_socket_name.contains('/') {
            return Err(PluginError::InvalidConfig {
                reason: format!(
                    "kubelet_socket_name must be a plain file name, got {:?}",
                    self.kubelet_socket_name
                ),
            });
        }
        if self.readiness_timeout_secs == 0 || self.registration_timeout_secs == 0 {
            return Err(PluginError::InvalidConfig {
                reason: "readiness and registration timeouts must be non-zero".to_string(),
            });
        }
        if self.restart_backoff_initial_ms > self.restart_backoff_max_ms {
            return Err(PluginError::InvalidConfig {
                reason: format!(
                    "restart_backoff_initial_ms ({}) exceeds restart_backoff_max_ms ({})",
                    self.restart_backoff_initial_ms, self.restart_backoff_max_ms
                ),
            });
        }
        Ok(())
    }

    /// Full path of the kubelet registration socket.
    pub fn kubelet_socket(&self) -> PathBuf {
        self.device_plugin_dir.join(&self.kubelet_socket_name)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}
