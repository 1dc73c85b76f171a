//! Kubelet device plugin gRPC API
//!
//! This crate defines the `v1beta1` device plugin protocol spoken between the
//! kubelet and pci-dp. The protobuf definitions are in `proto/deviceplugin.proto`
//! and code-generated via `tonic-build`.

// Include the generated code
pub mod v1beta1 {
    tonic::include_proto!("v1beta1");
}

/// Device plugin API version sent in every registration request.
pub const VERSION: &str = "v1beta1";

/// Health value reported for a usable device.
pub const HEALTHY: &str = "Healthy";
