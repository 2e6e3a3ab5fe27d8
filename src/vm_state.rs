//! Shared vocabulary for VM lifecycle state.
//!
//! `VmState` is rebuilt from hypervisor queries on every invocation and
//! never cached. Each variant carries what the verbs need to act on it.

use std::fmt;

use crate::address;
use crate::backend::VmStatus;
use crate::error::DevboxError;
use crate::health;
use crate::lifecycle::Machine;
use crate::ssh::SshAddress;

/// How to reach an existing VM. Fixed once the VM has been created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmIdentity {
    pub name: String,
    pub domain: String,
    pub ip: String,
    /// Host port forwarded to the guest's SSH port.
    pub ssh_port: u16,
}

impl VmIdentity {
    /// Loopback forward first, host-only network second.
    pub fn ssh_addresses(&self) -> [SshAddress; 2] {
        [
            SshAddress::new("127.0.0.1", self.ssh_port),
            SshAddress::new(self.ip.clone(), 22),
        ]
    }

    pub fn loopback(&self) -> SshAddress {
        SshAddress::new("127.0.0.1", self.ssh_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    /// The hypervisor does not know the VM.
    NotCreated { name: String },

    /// Powered off.
    Stopped(VmIdentity),

    /// Powered on and the guest health check answers `ok`.
    Running(VmIdentity),

    /// Powered on, but neither health probe succeeded.
    Unprovisioned(VmIdentity),

    /// Suspended to disk.
    Saved(VmIdentity),

    /// Execution paused in memory.
    Paused(VmIdentity),

    /// Cannot be driven; every verb reports `reason`.
    Invalid { name: String, reason: String },
}

impl VmState {
    pub fn name(&self) -> &str {
        match self {
            VmState::NotCreated { name } | VmState::Invalid { name, .. } => name,
            VmState::Stopped(id)
            | VmState::Running(id)
            | VmState::Unprovisioned(id)
            | VmState::Saved(id)
            | VmState::Paused(id) => &id.name,
        }
    }

    pub fn identity(&self) -> Option<&VmIdentity> {
        match self {
            VmState::NotCreated { .. } | VmState::Invalid { .. } => None,
            VmState::Stopped(id)
            | VmState::Running(id)
            | VmState::Unprovisioned(id)
            | VmState::Saved(id)
            | VmState::Paused(id) => Some(id),
        }
    }

    /// What `status` prints.
    pub fn label(&self) -> &'static str {
        match self {
            VmState::NotCreated { .. } => "Not created",
            VmState::Stopped(_) => "Stopped",
            VmState::Running(_) => "Running",
            VmState::Unprovisioned(_) => "Running (unprovisioned)",
            VmState::Saved(_) => "Suspended",
            VmState::Paused(_) => "Paused",
            VmState::Invalid { .. } => "Invalid",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reconstruct the state of `name` from the hypervisor.
///
/// Failing to work out the identity of an existing VM is not an error here;
/// it yields `Invalid` so that the verbs can report it.
pub async fn detect_state(machine: &Machine, name: &str) -> Result<VmState, DevboxError> {
    detect(machine, name, true).await
}

/// Like [`detect_state`] without the guest health check: a powered-on VM
/// is reported as `Running` whether or not it is provisioned. For callers
/// that treat both the same, such as destroy.
pub async fn detect_power_state(machine: &Machine, name: &str) -> Result<VmState, DevboxError> {
    detect(machine, name, false).await
}

async fn detect(machine: &Machine, name: &str, check_health: bool) -> Result<VmState, DevboxError> {
    let status = machine.driver.vm_status(name).await?;

    if status == VmStatus::NotCreated {
        let files = machine.config.vm_files_dir(name);
        if machine.fs.exists(&files).await? {
            return Ok(VmState::Invalid {
                name: name.to_string(),
                reason: "VM files need to be purged".into(),
            });
        }
        return Ok(VmState::NotCreated {
            name: name.to_string(),
        });
    }

    let identity = match identify(machine, name).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(vm = name, error = %e, "could not identify VM");
            return Ok(VmState::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }
    };

    Ok(match status {
        VmStatus::Running => {
            if !check_health || health::check(machine, &identity).await {
                VmState::Running(identity)
            } else {
                VmState::Unprovisioned(identity)
            }
        }
        VmStatus::Stopped => VmState::Stopped(identity),
        VmStatus::Saved => VmState::Saved(identity),
        VmStatus::Paused => VmState::Paused(identity),
        VmStatus::NotCreated => VmState::NotCreated {
            name: name.to_string(),
        },
    })
}

async fn identify(machine: &Machine, name: &str) -> Result<VmIdentity, DevboxError> {
    let ip = machine.driver.vm_ip(name).await?;
    let domain = address::domain_for_ip(&ip)?;
    let ssh_port = machine.driver.host_forward_port(name, "ssh").await?;
    Ok(VmIdentity {
        name: name.to_string(),
        domain,
        ip,
        ssh_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::TestRig;

    #[tokio::test]
    async fn unknown_vm_is_not_created() {
        let rig = TestRig::new();
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert_eq!(
            state,
            VmState::NotCreated {
                name: "devbox-v1".into()
            }
        );
    }

    #[tokio::test]
    async fn leftover_files_make_state_invalid() {
        let rig = TestRig::new();
        rig.fs.put(rig.config.vm_files_dir("devbox-v1"), 0, "");
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert_eq!(
            state,
            VmState::Invalid {
                name: "devbox-v1".into(),
                reason: "VM files need to be purged".into()
            }
        );
    }

    #[tokio::test]
    async fn stopped_vm_carries_identity() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Stopped);
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert_eq!(state, VmState::Stopped(TestRig::identity("devbox-v1")));
        assert_eq!(state.label(), "Stopped");
    }

    #[tokio::test]
    async fn saved_and_paused_map_through() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Saved);
        rig.driver.add_vm("devbox-custom", VmStatus::Paused);
        let machine = rig.machine();
        assert!(matches!(
            detect_state(&machine, "devbox-v1").await.unwrap(),
            VmState::Saved(_)
        ));
        assert!(matches!(
            detect_state(&machine, "devbox-custom").await.unwrap(),
            VmState::Paused(_)
        ));
    }

    #[tokio::test]
    async fn healthy_running_vm_is_running() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Running);
        rig.ssh.respond("127.0.0.1:50022", Ok("ok\n".into()));
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert!(matches!(state, VmState::Running(_)));
    }

    #[tokio::test]
    async fn unhealthy_running_vm_is_unprovisioned() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Running);
        rig.ssh.respond("127.0.0.1:50022", Ok("not ok".into()));
        rig.ssh.respond("192.168.11.11:22", Ok("starting".into()));
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert!(matches!(state, VmState::Unprovisioned(_)));
        assert_eq!(state.label(), "Running (unprovisioned)");
    }

    #[tokio::test]
    async fn power_state_skips_health_check() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Running);
        let state = detect_power_state(&rig.machine(), "devbox-v1").await.unwrap();
        assert_eq!(state, VmState::Running(TestRig::identity("devbox-v1")));
        assert!(rig.ssh.commands().is_empty());
    }

    #[tokio::test]
    async fn ip_outside_allow_list_is_invalid() {
        let rig = TestRig::new();
        rig.driver.add_vm("devbox-v1", VmStatus::Stopped);
        rig.driver.set_ip("devbox-v1", "10.0.0.11");
        let state = detect_state(&rig.machine(), "devbox-v1").await.unwrap();
        match state {
            VmState::Invalid { reason, .. } => {
                assert_eq!(reason, "10.0.0.11 is not one of the allowed devbox addresses")
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognised_hypervisor_state_is_an_error() {
        let rig = TestRig::new();
        rig.driver.fail_status_with_unknown("devbox-v1", "teleporting");
        let err = detect_state(&rig.machine(), "devbox-v1").await.unwrap_err();
        assert_eq!(err.to_string(), "failed to handle VM state 'teleporting'");
    }

    #[test]
    fn ssh_addresses_prefer_loopback() {
        let id = TestRig::identity("devbox-v1");
        let [first, second] = id.ssh_addresses();
        assert_eq!(first, SshAddress::new("127.0.0.1", 50022));
        assert_eq!(second, SshAddress::new("192.168.11.11", 22));
    }
}
