//! End-to-end tests of the device plugin server over real Unix sockets.
//!
//! A fake kubelet registration service runs in-process on a temp directory.

use pcidp_api::v1beta1::device_plugin_client::DevicePluginClient;
use pcidp_api::v1beta1::registration_server::{Registration, RegistrationServer};
use pcidp_api::v1beta1::{
    AllocateRequest, ContainerAllocateRequest, Empty, PreStartContainerRequest, RegisterRequest,
};
use pcidp_core::plugin::{dial, PciPluginServer};
use pcidp_core::{
    Config, GrpcPluginLauncher, HostEvent, Instance, InstanceManager, PciDeviceDescriptor,
    PluginError, PluginServer, RestartBackoff, RestartState,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

type Registrations = Arc<Mutex<Vec<RegisterRequest>>>;

/// Registration service standing in for the kubelet.
struct FakeKubelet {
    registrations: Registrations,
    reject: bool,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.registrations.lock().unwrap().push(request.into_inner());
        if self.reject {
            return Err(Status::invalid_argument("unsupported device plugin version"));
        }
        Ok(Response::new(Empty {}))
    }
}

fn spawn_kubelet(socket: &Path, reject: bool) -> Registrations {
    let registrations = Registrations::default();
    let uds = UnixListener::bind(socket).unwrap();
    let kubelet = FakeKubelet { registrations: Arc::clone(&registrations), reject };
    tokio::spawn(
        Server::builder()
            .add_service(RegistrationServer::new(kubelet))
            .serve_with_incoming(UnixListenerStream::new(uds)),
    );
    registrations
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        device_plugin_dir: dir.path().to_path_buf(),
        readiness_timeout_secs: 5,
        registration_timeout_secs: 1,
        ..Config::default()
    }
}

fn test_instance(dir: &TempDir) -> Instance {
    let device = PciDeviceDescriptor::new("0000:00:1f.0", "8086", "a323", 7);
    Instance::new(device, dir.path())
}

#[tokio::test]
async fn test_serve_registers_and_answers_rpcs() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registrations = spawn_kubelet(&config.kubelet_socket(), false);
    let instance = test_instance(&dir);

    let mut server = PciPluginServer::new(&instance, &config);
    server.serve().await.unwrap();
    assert!(server.is_running());
    assert!(instance.socket_path().exists());

    {
        let registrations = registrations.lock().unwrap();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].version, "v1beta1");
        assert_eq!(registrations[0].endpoint, "pci-dev-0000-00-1f-0.sock");
        assert_eq!(registrations[0].resource_name, "pci/dev-0000-00-1f-0");
    }

    let channel = dial(instance.socket_path(), Duration::from_secs(5)).await.unwrap();
    let mut client = DevicePluginClient::new(channel);

    let options = client.get_device_plugin_options(Empty {}).await.unwrap().into_inner();
    assert!(!options.pre_start_required);

    let mut stream = client.list_and_watch(Empty {}).await.unwrap().into_inner();
    let snapshot = stream.message().await.unwrap().unwrap();
    assert_eq!(snapshot.devices.len(), 1);
    assert_eq!(snapshot.devices[0].id, "0000:00:1f.0");
    assert_eq!(snapshot.devices[0].health, "Healthy");

    let response = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["0000:00:1f.0".to_string()],
            }],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.container_responses.len(), 1);
    let container = &response.container_responses[0];
    assert_eq!(container.devices.len(), 6);
    assert!(container.devices.iter().all(|d| d.permissions == "mrw"));
    assert_eq!(
        container.envs.get("PCI_RESOURCE_PCI_DEV-0000-00-1F-0").map(String::as_str),
        Some("0000:00:1f.0")
    );

    client
        .pre_start_container(PreStartContainerRequest { devices_ids: vec![] })
        .await
        .unwrap();

    // Stopping ends the watch stream and removes the socket
    server.stop().await.unwrap();
    let end = tokio::time::timeout(Duration::from_secs(5), stream.message()).await.unwrap();
    assert!(!matches!(end, Ok(Some(_))));
    assert!(!instance.socket_path().exists());
    assert!(!server.is_running());

    // Second stop is a no-op
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_rejected_registration_releases_socket() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registrations = spawn_kubelet(&config.kubelet_socket(), true);
    let instance = test_instance(&dir);

    let mut server = PciPluginServer::new(&instance, &config);
    let err = server.serve().await.unwrap_err();

    assert!(matches!(err, PluginError::RegistrationFailed { .. }));
    assert_eq!(registrations.lock().unwrap().len(), 1);
    assert!(!server.is_running());
    assert!(!instance.socket_path().exists());
}

#[tokio::test]
async fn test_unreachable_kubelet_fails_registration() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let instance = test_instance(&dir);

    let mut server = PciPluginServer::new(&instance, &config);
    let err = server.serve().await.unwrap_err();

    assert!(matches!(err, PluginError::RegistrationFailed { .. }));
    assert!(!instance.socket_path().exists());
}

#[tokio::test]
async fn test_bind_failure_aborts_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(&dir));
    spawn_kubelet(&config.kubelet_socket(), false);

    // Socket directory that does not exist
    let missing = dir.path().join("missing");
    let device = PciDeviceDescriptor::new("0000:00:1f.0", "8086", "a323", 7);
    let instance = Instance::new(device.clone(), &missing);

    let mut server = PciPluginServer::new(&instance, &config);
    let err = server.serve().await.unwrap_err();
    assert!(matches!(err, PluginError::BindFailed { .. }));
    assert!(!server.is_running());

    let instances = InstanceManager::build_instances(vec![device], &missing);
    let launcher = Arc::new(GrpcPluginLauncher::new(Arc::clone(&config)));
    let mut manager =
        InstanceManager::new(instances, launcher, RestartBackoff::from_config(&config));

    let err = manager.restart().await.unwrap_err();
    assert!(matches!(err, PluginError::BindFailed { .. }));
    assert_eq!(manager.state(), RestartState::NeedsStart);
    assert!(!manager.instances()[0].is_running());
}

#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    spawn_kubelet(&config.kubelet_socket(), false);
    let instance = test_instance(&dir);

    std::fs::write(instance.socket_path(), b"left over").unwrap();

    let mut server = PciPluginServer::new(&instance, &config);
    server.serve().await.unwrap();
    dial(instance.socket_path(), Duration::from_secs(5)).await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_manager_reregisters_after_kubelet_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(&dir));
    let registrations = spawn_kubelet(&config.kubelet_socket(), false);

    let devices = vec![
        PciDeviceDescriptor::new("0000:00:1f.0", "8086", "a323", 7),
        PciDeviceDescriptor::new("0000:01:00.0", "10de", "2204", 8),
    ];
    let instances = InstanceManager::build_instances(devices, &config.device_plugin_dir);
    let launcher = Arc::new(GrpcPluginLauncher::new(Arc::clone(&config)));
    let mut manager =
        InstanceManager::new(instances, launcher, RestartBackoff::from_config(&config));

    manager.restart().await.unwrap();
    assert_eq!(manager.state(), RestartState::Running);
    assert_eq!(registrations.lock().unwrap().len(), 2);

    manager.handle_event(HostEvent::RegistrationSocketCreated);
    manager.restart().await.unwrap();
    assert_eq!(manager.state(), RestartState::Running);

    let names: Vec<String> =
        registrations.lock().unwrap().iter().map(|r| r.resource_name.clone()).collect();
    assert_eq!(
        names,
        vec![
            "pci/dev-0000-00-1f-0",
            "pci/dev-0000-01-00-0",
            "pci/dev-0000-00-1f-0",
            "pci/dev-0000-01-00-0",
        ]
    );

    manager.stop_instances().await.unwrap();
    assert!(manager.instances().iter().all(|i| !i.socket_path().exists()));
}
