//! Error types for pci-dp.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pci-dp operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Main error type for pci-dp.
#[derive(Error, Debug)]
pub enum PluginError {
    // Discovery errors
    #[error("Failed to list vfio-pci driver directory {path:?}: {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PCI device {address}: {reason}")]
    InvalidDevice { address: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Server errors
    #[error("Failed to bind device plugin socket {socket:?}: {source}")]
    BindFailed {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout:?} dialing {endpoint:?}: {reason}")]
    DialTimeout { endpoint: PathBuf, timeout: Duration, reason: String },

    #[error("Failed to register {resource_name} with kubelet: {reason}")]
    RegistrationFailed { resource_name: String, reason: String },

    // Lifecycle errors
    #[error("No instance at index {index} ({count} instances)")]
    UnknownInstance { index: usize, count: usize },

    // Event source errors
    #[error("File system watch failed: {0}")]
    WatchFailed(String),

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

