pub mod vbox;

use std::path::Path;

use async_trait::async_trait;

use crate::error::DevboxError;
use crate::network::{InterfaceUsage, NetworkInterface};

/// What the hypervisor reports for a VM name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    NotCreated,
    Running,
    Stopped,
    Saved,
    Paused,
}

/// Everything the lifecycle needs from the hypervisor.
///
/// Implementations map their own failures to `DevboxError`; none of these
/// calls retries.
#[async_trait]
pub trait HypervisorDriver: InterfaceUsage {
    async fn vm_status(&self, name: &str) -> Result<VmStatus, DevboxError>;
    /// Names of all registered VMs.
    async fn vms(&self) -> Result<Vec<String>, DevboxError>;

    /// Register the image as `name`, keeping its files under `base_folder`.
    async fn import_vm(&self, image: &Path, name: &str, base_folder: &Path) -> Result<(), DevboxError>;
    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), DevboxError>;
    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), DevboxError>;

    async fn start_vm(&self, name: &str) -> Result<(), DevboxError>;
    /// Graceful shutdown request; returns before the guest is down.
    async fn stop_vm(&self, name: &str) -> Result<(), DevboxError>;
    async fn power_off_vm(&self, name: &str) -> Result<(), DevboxError>;
    async fn suspend_vm(&self, name: &str) -> Result<(), DevboxError>;
    /// Boot a VM from its saved state.
    async fn resume_vm(&self, name: &str) -> Result<(), DevboxError>;
    async fn resume_paused_vm(&self, name: &str) -> Result<(), DevboxError>;
    /// Unregister the VM and delete its files.
    async fn destroy_vm(&self, name: &str) -> Result<(), DevboxError>;

    async fn host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError>;
    /// Create a host-only interface carrying `ip`; returns its name.
    async fn create_host_only_interface(&self, ip: &str) -> Result<String, DevboxError>;
    async fn attach_interface(&self, interface: &str, vm: &str) -> Result<(), DevboxError>;
    async fn forward_port(
        &self,
        vm: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), DevboxError>;

    /// Guest address on the attached host-only network.
    async fn vm_ip(&self, vm: &str) -> Result<String, DevboxError>;
    async fn host_forward_port(&self, vm: &str, rule: &str) -> Result<u16, DevboxError>;

    /// Hypervisor's own dump of the VM's settings, for bug reports.
    async fn describe_vm(&self, name: &str) -> Result<String, DevboxError>;
}

pub fn create_driver() -> vbox::VBoxDriver {
    vbox::VBoxDriver::default()
}
