//! gRPC `DevicePlugin` service for one PCI device.

use crate::observability::metrics;
use crate::plugin::allocation::DeviceAllocation;
use pcidp_api::v1beta1::device_plugin_server::DevicePlugin;
use pcidp_api::v1beta1::{
    AllocateRequest, AllocateResponse, Device, DevicePluginOptions, Empty, ListAndWatchResponse,
    PreStartContainerRequest, PreStartContainerResponse, PreferredAllocationRequest,
    PreferredAllocationResponse,
};
use std::pin::Pin;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};

type ListAndWatchStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ListAndWatchResponse, Status>> + Send>>;

/// Device plugin service advertising a single vfio-pci device.
pub struct PciDevicePlugin {
    resource_name: String,
    devices: Vec<Device>,
    allocation: DeviceAllocation,
    /// Flips to `true` when the owning server stops
    stop: watch::Receiver<bool>,
}

impl PciDevicePlugin {
    pub fn new(
        resource_name: &str,
        devices: Vec<Device>,
        allocation: DeviceAllocation,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self { resource_name: resource_name.to_string(), devices, allocation, stop }
    }
}

#[tonic::async_trait]
impl DevicePlugin for PciDevicePlugin {
    type ListAndWatchStream = ListAndWatchStream;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions::default()))
    }

    #[instrument(skip_all, fields(resource = %self.resource_name))]
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListAndWatchStream>, Status> {
        info!("gRPC: ListAndWatch");

        let (tx, rx) = mpsc::channel(1);
        let snapshot = ListAndWatchResponse { devices: self.devices.clone() };
        let stop = self.stop.clone();
        let resource = self.resource_name.clone();

        // Health is reported once; the stream then stays open until the server stops
        tokio::spawn(async move {
            if tx.send(Ok(snapshot)).await.is_err() {
                return;
            }
            tokio::select! {
                _ = wait_stopped(stop) => {
                    debug!(resource = %resource, "ListAndWatch ended by stop")
                }
                _ = tx.closed() => {
                    debug!(resource = %resource, "ListAndWatch client went away")
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_preferred_allocation(
        &self,
        _request: Request<PreferredAllocationRequest>,
    ) -> std::result::Result<Response<PreferredAllocationResponse>, Status> {
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    #[instrument(skip_all, fields(resource = %self.resource_name))]
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> std::result::Result<Response<AllocateResponse>, Status> {
        let req = request.into_inner();

        let container_responses = req
            .container_requests
            .iter()
            .map(|container| {
                info!(devices = ?container.devices_ids, "Allocated PCI device");
                metrics::record_allocation(&self.resource_name);
                self.allocation.container_response()
            })
            .collect();

        Ok(Response::new(AllocateResponse { container_responses }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> std::result::Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}

/// Resolve once the stop flag is set or its sender is gone.
async fn wait_stopped(mut stop: watch::Receiver<bool>) {
    loop {
        let stopped = *stop.borrow_and_update();
        if stopped || stop.changed().await.is_err() {
            return;
        }
    }
}
