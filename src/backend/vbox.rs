//! `HypervisorDriver` on top of the `VBoxManage` command line.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{HypervisorDriver, VmStatus};
use crate::address;
use crate::error::DevboxError;
use crate::network::{InterfaceUsage, NetworkInterface};

pub struct VBoxDriver {
    program: String,
}

impl Default for VBoxDriver {
    fn default() -> Self {
        Self {
            program: "VBoxManage".into(),
        }
    }
}

impl VBoxDriver {
    async fn run(&self, args: &[&str]) -> Result<String, DevboxError> {
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "running");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| DevboxError::ExternalCommand {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DevboxError::ExternalCommand {
                command,
                message: stderr.trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn vm_info(&self, name: &str) -> Result<HashMap<String, String>, DevboxError> {
        let out = self.run(&["showvminfo", name, "--machinereadable"]).await?;
        Ok(parse_machine_readable(&out))
    }

    async fn running_vms(&self) -> Result<Vec<String>, DevboxError> {
        Ok(parse_vm_list(&self.run(&["list", "runningvms"]).await?))
    }

    async fn controlvm(&self, name: &str, action: &str) -> Result<(), DevboxError> {
        self.run(&["controlvm", name, action]).await.map(drop)
    }
}

#[async_trait]
impl InterfaceUsage for VBoxDriver {
    async fn is_interface_in_use(&self, name: &str) -> Result<bool, DevboxError> {
        for vm in self.running_vms().await? {
            let info = self.vm_info(&vm).await?;
            if info.get("hostonlyadapter2").is_some_and(|a| a == name) {
                tracing::debug!(interface = name, vm = %vm, "interface attached to running VM");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl HypervisorDriver for VBoxDriver {
    async fn vm_status(&self, name: &str) -> Result<VmStatus, DevboxError> {
        if !self.vms().await?.iter().any(|vm| vm == name) {
            return Ok(VmStatus::NotCreated);
        }
        let info = self.vm_info(name).await?;
        let state = info.get("VMState").map(String::as_str).unwrap_or_default();
        parse_vm_state(state)
    }

    async fn vms(&self) -> Result<Vec<String>, DevboxError> {
        Ok(parse_vm_list(&self.run(&["list", "vms"]).await?))
    }

    async fn import_vm(&self, image: &Path, name: &str, base_folder: &Path) -> Result<(), DevboxError> {
        let image = image.to_string_lossy();
        let base_folder = base_folder.to_string_lossy();
        self.run(&[
            "import",
            image.as_ref(),
            "--vsys",
            "0",
            "--vmname",
            name,
            "--basefolder",
            base_folder.as_ref(),
        ])
        .await
        .map(drop)
    }

    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), DevboxError> {
        let memory = memory_mb.to_string();
        self.run(&["modifyvm", name, "--memory", memory.as_str()]).await.map(drop)
    }

    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), DevboxError> {
        let cpus = cpus.to_string();
        self.run(&["modifyvm", name, "--cpus", cpus.as_str()]).await.map(drop)
    }

    async fn start_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.run(&["startvm", name, "--type", "headless"]).await.map(drop)
    }

    async fn stop_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.controlvm(name, "acpipowerbutton").await
    }

    async fn power_off_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.controlvm(name, "poweroff").await
    }

    async fn suspend_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.controlvm(name, "savestate").await
    }

    async fn resume_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.start_vm(name).await
    }

    async fn resume_paused_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.controlvm(name, "resume").await
    }

    async fn destroy_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.run(&["unregistervm", name, "--delete"]).await.map(drop)
    }

    async fn host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError> {
        Ok(parse_host_only_interfaces(
            &self.run(&["list", "hostonlyifs"]).await?,
        ))
    }

    async fn create_host_only_interface(&self, ip: &str) -> Result<String, DevboxError> {
        let out = self.run(&["hostonlyif", "create"]).await?;
        let name = parse_created_interface(&out).ok_or_else(|| DevboxError::ExternalCommand {
            command: format!("{} hostonlyif create", self.program),
            message: format!("unexpected output: {}", out.trim()),
        })?;
        self.run(&[
            "hostonlyif",
            "ipconfig",
            name.as_str(),
            "--ip",
            ip,
            "--netmask",
            "255.255.255.0",
        ])
        .await?;
        tracing::info!(interface = %name, ip, "created host-only interface");
        Ok(name)
    }

    async fn attach_interface(&self, interface: &str, vm: &str) -> Result<(), DevboxError> {
        self.run(&[
            "modifyvm",
            vm,
            "--nic2",
            "hostonly",
            "--hostonlyadapter2",
            interface,
        ])
        .await
        .map(drop)
    }

    async fn forward_port(
        &self,
        vm: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), DevboxError> {
        let natpf = format!("{rule},tcp,127.0.0.1,{host_port},,{guest_port}");
        self.run(&["modifyvm", vm, "--natpf1", natpf.as_str()]).await.map(drop)
    }

    async fn vm_ip(&self, vm: &str) -> Result<String, DevboxError> {
        let info = self.vm_info(vm).await?;
        let adapter = info
            .get("hostonlyadapter2")
            .filter(|a| !a.is_empty() && *a != "none")
            .ok_or_else(|| DevboxError::Precondition {
                message: format!("there is no attached host-only interface for {vm}"),
            })?;
        let interfaces = self.host_only_interfaces().await?;
        let iface = interfaces
            .iter()
            .find(|i| &i.name == adapter)
            .ok_or_else(|| DevboxError::Precondition {
                message: format!("host-only interface {adapter} of {vm} no longer exists"),
            })?;
        address::ip_for_subnet(&address::subnet_for_ip(&iface.ip)?)
    }

    async fn host_forward_port(&self, vm: &str, rule: &str) -> Result<u16, DevboxError> {
        let info = self.vm_info(vm).await?;
        forwarded_port(&info, rule).ok_or_else(|| DevboxError::Precondition {
            message: format!("could not find forwarded port '{rule}' for {vm}"),
        })
    }

    async fn describe_vm(&self, name: &str) -> Result<String, DevboxError> {
        self.run(&["showvminfo", name, "--machinereadable"]).await
    }
}

// ── output parsing ───────────────────────────────────────

/// `"devbox-v1" {3e1a...}` lines → names.
pub fn parse_vm_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let end = rest.rfind('"')?;
            Some(rest[..end].to_string())
        })
        .collect()
}

/// `key="value"` / `key=value` lines of `showvminfo --machinereadable`.
pub fn parse_machine_readable(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((
                key.trim().trim_matches('"').to_string(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

pub fn parse_vm_state(state: &str) -> Result<VmStatus, DevboxError> {
    match state {
        "running" => Ok(VmStatus::Running),
        "poweroff" | "aborted" => Ok(VmStatus::Stopped),
        "saved" => Ok(VmStatus::Saved),
        "paused" => Ok(VmStatus::Paused),
        other => Err(DevboxError::UnknownState {
            state: other.to_string(),
        }),
    }
}

/// Blank-line separated blocks of `list hostonlyifs`.
pub fn parse_host_only_interfaces(output: &str) -> Vec<NetworkInterface> {
    let mut interfaces = Vec::new();
    let mut current: HashMap<&str, &str> = HashMap::new();

    let mut flush = |block: &mut HashMap<&str, &str>| {
        if let (Some(name), Some(ip)) = (block.get("Name"), block.get("IPAddress")) {
            interfaces.push(NetworkInterface {
                name: name.to_string(),
                ip: ip.to_string(),
                hardware_address: block.get("HardwareAddress").unwrap_or(&"").to_string(),
                exists: true,
            });
        }
        block.clear();
    };

    for line in output.lines() {
        if line.trim().is_empty() {
            flush(&mut current);
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.insert(key.trim(), value.trim());
        }
    }
    flush(&mut current);
    interfaces
}

/// `Interface 'vboxnet1' was successfully created` → `vboxnet1`.
pub fn parse_created_interface(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.split_once("Interface '")?.1;
        let (name, _) = rest.split_once('\'')?;
        Some(name.to_string())
    })
}

/// Host port of the NAT rule named `rule` (`Forwarding(0)="ssh,tcp,127.0.0.1,50022,,22"`).
pub fn forwarded_port(info: &HashMap<String, String>, rule: &str) -> Option<u16> {
    info.iter()
        .filter(|(key, _)| key.starts_with("Forwarding("))
        .find_map(|(_, value)| {
            let fields: Vec<&str> = value.split(',').collect();
            match fields.as_slice() {
                [name, _proto, _host_ip, host_port, ..] if *name == rule => host_port.parse().ok(),
                _ => None,
            }
        })
}
