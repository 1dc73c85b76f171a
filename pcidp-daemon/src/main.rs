//! pci-dp: advertise vfio-pci bound PCI devices to the kubelet.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pcidp_core::{
    init_observability, Config, DeviceScanner, GrpcPluginLauncher, InstanceManager, RestartBackoff,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

mod signals;
mod watch;

/// Capacity of the host event channel feeding the control loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "pci-dp")]
#[command(about = "Kubernetes device plugin for vfio-pci bound PCI devices", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "PCIDP_CONFIG")]
    config: Option<PathBuf>,

    /// vfio-pci driver directory to scan for devices
    #[arg(long)]
    driver_dir: Option<PathBuf>,

    /// Kubelet device plugin directory
    #[arg(long)]
    device_plugin_dir: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Expose Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    /// Load the configuration file and apply command line overrides.
    fn into_config(self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(dir) = self.driver_dir {
            config.driver_dir = dir;
        }
        if let Some(dir) = self.device_plugin_dir {
            config.device_plugin_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.metrics_port.is_some() {
            config.metrics_port = self.metrics_port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Args::parse().into_config()?);

    init_observability(&config.log_level, config.metrics_port)
        .map_err(|e| anyhow!("Failed to initialize observability: {}", e))?;

    info!("Scanning {} for devices", config.driver_dir.display());
    let devices = DeviceScanner::from_config(&config)
        .scan()
        .context("Cannot enumerate vfio-pci devices")?;

    info!("Starting new instance manager with {} device(s)", devices.len());
    let instances = InstanceManager::build_instances(devices, &config.device_plugin_dir);
    let launcher = Arc::new(GrpcPluginLauncher::new(Arc::clone(&config)));
    let mut manager =
        InstanceManager::new(instances, launcher, RestartBackoff::from_config(&config));

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    info!("Starting new FS watcher");
    let _watcher = watch::watch_registration_socket(
        &config.device_plugin_dir,
        &config.kubelet_socket_name,
        tx.clone(),
    )
    .context("Failed to watch the device plugin directory")?;

    info!("Starting new OS watcher");
    let signals = signals::spawn_signal_listener(tx).context("Failed to install signal handlers")?;

    manager.run(rx).await?;

    signals.abort();
    info!("pci-dp exiting");
    Ok(())
}
