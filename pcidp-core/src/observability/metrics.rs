//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - plain names for gauges

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_counter!(
        "pcidp_registrations_total",
        "Successful kubelet registrations (by resource)"
    );
    describe_counter!(
        "pcidp_registration_failures_total",
        "Failed kubelet registrations (by resource)"
    );
    describe_counter!("pcidp_allocations_total", "Container allocations served (by resource)");
    describe_counter!("pcidp_restart_attempts_total", "Full stop/start cycles attempted");
    describe_counter!("pcidp_restart_failures_total", "Stop/start cycles that failed");
    describe_gauge!("pcidp_instances_running", "Device plugin instances currently serving");
}

pub fn record_registration(resource: &str) {
    counter!("pcidp_registrations_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_registration_failure(resource: &str) {
    counter!("pcidp_registration_failures_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_allocation(resource: &str) {
    counter!("pcidp_allocations_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_restart_attempt() {
    counter!("pcidp_restart_attempts_total").increment(1);
}

pub fn record_restart_failure() {
    counter!("pcidp_restart_failures_total").increment(1);
}

pub fn set_instances_running(count: usize) {
    gauge!("pcidp_instances_running").set(count as f64);
}
