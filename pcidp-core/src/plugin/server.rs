//! Device plugin server lifecycle: bind, serve, register, stop.

use crate::config::Config;
use crate::error::{PluginError, Result};
use crate::manager::Instance;
use crate::observability::metrics;
use crate::pci::PciDeviceDescriptor;
use crate::plugin::allocation::DeviceAllocation;
use crate::plugin::dial::dial;
use crate::plugin::service::PciDevicePlugin;
use crate::plugin::{cleanup_socket, PluginLauncher, PluginServer};
use async_trait::async_trait;
use pcidp_api::v1beta1::device_plugin_server::DevicePluginServer;
use pcidp_api::v1beta1::registration_client::RegistrationClient;
use pcidp_api::v1beta1::{Device, RegisterRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

/// How long a stopping server may take to drain before its task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running gRPC server bound to the plugin socket.
struct ServerHandle {
    /// Ends open ListAndWatch streams
    stop: watch::Sender<bool>,
    /// Triggers tonic graceful shutdown
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

/// Device plugin server for one vfio-pci device.
pub struct PciPluginServer {
    device: PciDeviceDescriptor,
    resource_name: String,
    socket_path: PathBuf,
    kubelet_socket: PathBuf,
    readiness_timeout: Duration,
    registration_timeout: Duration,
    allocation: DeviceAllocation,
    handle: Option<ServerHandle>,
}

impl PciPluginServer {
    pub fn new(instance: &Instance, config: &Config) -> Self {
        let device = instance.device().clone();
        let allocation = DeviceAllocation::new(&device, instance.resource_name(), config);
        Self {
            device,
            resource_name: instance.resource_name().to_string(),
            socket_path: instance.socket_path().to_path_buf(),
            kubelet_socket: config.kubelet_socket(),
            readiness_timeout: config.readiness_timeout(),
            registration_timeout: config.registration_timeout(),
            allocation,
            handle: None,
        }
    }

    /// Devices advertised to the kubelet. Health is static.
    pub fn devices(&self) -> Vec<Device> {
        vec![Device {
            id: self.device.address.clone(),
            health: pcidp_api::HEALTHY.to_string(),
            topology: None,
        }]
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Bind the socket, start serving, and wait until the socket accepts.
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            self.shutdown().await?;
        }

        cleanup_socket(&self.socket_path)?;
        let uds = UnixListener::bind(&self.socket_path)
            .map_err(|e| PluginError::BindFailed { socket: self.socket_path.clone(), source: e })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let service = PciDevicePlugin::new(
            &self.resource_name,
            self.devices(),
            self.allocation.clone(),
            stop_rx,
        );

        let task = tokio::spawn(
            Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(uds), async move {
                    let _ = shutdown_rx.await;
                }),
        );
        self.handle = Some(ServerHandle { stop: stop_tx, shutdown: shutdown_tx, task });

        let socket = self.socket_path.clone();
        self.await_ready(&socket).await?;

        info!(socket = %self.socket_path.display(), "Starting to serve");
        Ok(())
    }

    /// Readiness gate: block until `socket` answers, or stop the server.
    async fn await_ready(&mut self, socket: &Path) -> Result<()> {
        if let Err(e) = dial(socket, self.readiness_timeout).await {
            error!(socket = %socket.display(), "Device plugin server not ready: {}", e);
            if let Err(stop_err) = self.shutdown().await {
                warn!("Failed to clean up unready server: {}", stop_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Register this server's socket under `resource_name` with the kubelet.
    pub async fn register(&self, kubelet_socket: &Path, resource_name: &str) -> Result<()> {
        let failed = |reason: String| PluginError::RegistrationFailed {
            resource_name: resource_name.to_string(),
            reason,
        };

        let endpoint = self
            .socket_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| failed(format!("{} has no file name", self.socket_path.display())))?;

        let channel = dial(kubelet_socket, self.registration_timeout)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let mut client = RegistrationClient::new(channel);

        let request = RegisterRequest {
            version: pcidp_api::VERSION.to_string(),
            endpoint,
            resource_name: resource_name.to_string(),
            options: None,
        };

        match tokio::time::timeout(self.registration_timeout, client.register(request)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(failed(format!("{:?}: {}", status.code(), status.message()))),
            Err(_) => Err(failed(format!("no response within {:?}", self.registration_timeout))),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!(socket = %self.socket_path.display(), "Stopping server");

        if let Some(mut handle) = self.handle.take() {
            let _ = handle.stop.send(true);
            let _ = handle.shutdown.send(());

            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle.task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Device plugin server exited with error: {}", e),
                Ok(Err(e)) => warn!("Device plugin server task failed: {}", e),
                Err(_) => {
                    warn!(
                        socket = %self.socket_path.display(),
                        "Server did not stop within {:?}, aborting", SHUTDOWN_GRACE
                    );
                    handle.task.abort();
                }
            }
            info!(socket = %self.socket_path.display(), "Server stopped");
        }

        cleanup_socket(&self.socket_path)
    }
}

#[async_trait]
impl PluginServer for PciPluginServer {
    async fn serve(&mut self) -> Result<()> {
        if let Err(e) = self.start().await {
            error!("Could not start device plugin: {}", e);
            return Err(e);
        }

        if let Err(e) = self.register(&self.kubelet_socket, &self.resource_name).await {
            error!("Could not register device plugin: {}", e);
            metrics::record_registration_failure(&self.resource_name);
            if let Err(stop_err) = self.shutdown().await {
                warn!("Failed to stop unregistered server: {}", stop_err);
            }
            return Err(e);
        }

        metrics::record_registration(&self.resource_name);
        info!(resource = %self.resource_name, "Registered device plugin with kubelet");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.shutdown().await
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Launches real gRPC servers.
#[derive(Debug, Clone)]
pub struct GrpcPluginLauncher {
    config: Arc<Config>,
}

impl GrpcPluginLauncher {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl PluginLauncher for GrpcPluginLauncher {
    fn launch(&self, instance: &Instance) -> Box<dyn PluginServer> {
        Box::new(PciPluginServer::new(instance, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::PciDeviceDescriptor;

    fn server(dir: &Path) -> (Instance, PciPluginServer) {
        let config = Config {
            device_plugin_dir: dir.to_path_buf(),
            readiness_timeout_secs: 1,
            registration_timeout_secs: 1,
            ..Config::default()
        };
        let device = PciDeviceDescriptor::new("0000:00:1f.0", "8086", "a323", 7);
        let instance = Instance::new(device, dir);
        let server = PciPluginServer::new(&instance, &config);
        (instance, server)
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, mut server) = server(dir.path());

        server.start().await.unwrap();
        assert!(server.is_running());
        assert!(instance.socket_path().exists());

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(!instance.socket_path().exists());
    }

    #[tokio::test]
    async fn test_unready_server_is_torn_down() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, mut server) = server(dir.path());
        server.start().await.unwrap();

        // A socket nobody listens on never becomes ready
        let err = server.await_ready(&dir.path().join("silent.sock")).await.unwrap_err();

        assert!(matches!(err, PluginError::DialTimeout { .. }));
        assert!(!server.is_running());
        assert!(!instance.socket_path().exists());
    }
}
