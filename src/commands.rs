//! The `devbox` subcommands: pick the VM, work out its state, hand off to
//! the lifecycle.

use facet::Facet;

use crate::config::{CUSTOM_VM_NAME, SystemConfig, VM_NAME_PREFIX};
use crate::download::{DownloadState, Downloader};
use crate::error::DevboxError;
use crate::lifecycle::{Machine, NOT_CREATED, StartOpts, StatusReport};
use crate::ssh;
use crate::vm_state::VmState;

fn devbox_vms(registered: &[String]) -> Vec<&str> {
    registered
        .iter()
        .map(String::as_str)
        .filter(|n| n.starts_with(VM_NAME_PREFIX))
        .collect()
}

/// The VM that `stop`, `status` and friends act on.
///
/// Prefers the current image's VM, then a custom one, then any older
/// generation still registered.
pub fn current_vm_name(config: &SystemConfig, registered: &[String]) -> String {
    let ours = devbox_vms(registered);
    let default = config.default_vm_name();
    if ours.contains(&default) {
        return default.to_string();
    }
    if ours.contains(&CUSTOM_VM_NAME) {
        return CUSTOM_VM_NAME.to_string();
    }
    ours.first()
        .map(|n| n.to_string())
        .unwrap_or_else(|| default.to_string())
}

/// The VM `start` should act on, refusing combinations that would leave
/// two devbox VMs side by side.
pub fn resolve_start_name(
    config: &SystemConfig,
    registered: &[String],
    custom_image: bool,
) -> Result<String, DevboxError> {
    let ours = devbox_vms(registered);
    let default = config.default_vm_name();

    if ours.iter().any(|n| *n != default && *n != CUSTOM_VM_NAME) {
        return Err(DevboxError::Precondition {
            message: "old version of devbox already present, please run `devbox destroy` to continue"
                .into(),
        });
    }
    if custom_image {
        if ours.contains(&default) {
            return Err(DevboxError::Precondition {
                message: "you must destroy your existing VM to use a custom image".into(),
            });
        }
        return Ok(CUSTOM_VM_NAME.to_string());
    }
    if ours.contains(&CUSTOM_VM_NAME) {
        return Ok(CUSTOM_VM_NAME.to_string());
    }
    Ok(default.to_string())
}

async fn current_state(machine: &Machine) -> Result<VmState, DevboxError> {
    let registered = machine.driver.vms().await?;
    let name = current_vm_name(&machine.config, &registered);
    machine.vm_state(&name).await
}

// ── download ─────────────────────────────────────────────

/// Fetch the configured image unless an intact copy is already on disk.
pub async fn download(machine: &Machine, downloader: &Downloader) -> Result<(), DevboxError> {
    let image = &machine.config.config.image;
    if image.url.is_empty() || image.md5.is_empty() {
        return Err(DevboxError::Validation {
            message: "no image configured; set [image] url and md5 in config.toml".into(),
        });
    }

    let state = DownloadState::new(machine.config.default_ova_path(), image.md5.as_str());
    if downloader.is_current(&state).await? {
        machine.ui.say("Using existing image");
        return Ok(());
    }
    machine.ui.say("Downloading VM image...");
    downloader.download(&state).await?;
    machine.ui.say("VM image downloaded");
    Ok(())
}

// ── lifecycle verbs ──────────────────────────────────────

pub async fn start(
    machine: &Machine,
    downloader: &Downloader,
    opts: &StartOpts,
) -> Result<(), DevboxError> {
    let registered = machine.driver.vms().await?;
    let name = resolve_start_name(&machine.config, &registered, opts.image_path.is_some())?;
    let state = machine.vm_state(&name).await?;
    tracing::debug!(vm = %name, state = %state, "starting");
    machine.verify_start_opts(&state, opts)?;

    if opts.provision_only {
        return machine.provision(&state, opts).await;
    }
    if matches!(state, VmState::NotCreated { .. }) && opts.image_path.is_none() {
        download(machine, downloader).await?;
    }
    machine.start(&state, opts).await
}

pub async fn stop(machine: &Machine) -> Result<(), DevboxError> {
    let state = current_state(machine).await?;
    machine.stop(&state).await
}

pub async fn suspend(machine: &Machine) -> Result<(), DevboxError> {
    let state = current_state(machine).await?;
    machine.suspend(&state).await
}

pub async fn resume(machine: &Machine) -> Result<(), DevboxError> {
    let state = current_state(machine).await?;
    machine.resume(&state).await
}

/// Remove every devbox VM, of any generation.
pub async fn destroy(machine: &Machine) -> Result<(), DevboxError> {
    let registered = machine.driver.vms().await?;
    let ours = devbox_vms(&registered);

    if ours.is_empty() {
        let mut purged = false;
        for name in [machine.config.default_vm_name(), CUSTOM_VM_NAME] {
            let files = machine.config.vm_files_dir(name);
            if machine.fs.exists(&files).await? {
                machine.fs.remove_dir(&files).await?;
                purged = true;
            }
        }
        machine.ui.say(if purged {
            "Removed leftover VM files"
        } else {
            NOT_CREATED
        });
        untrust(machine).await;
        return Ok(());
    }

    machine.ui.say("Destroying VM...");
    for name in ours {
        match machine.power_state(name).await {
            Ok(VmState::Invalid { reason, .. }) => {
                tracing::warn!(vm = name, %reason, "purging VM in invalid state");
                machine.purge(name).await?;
            }
            Ok(state) => machine.destroy(&state).await?,
            Err(e) => {
                tracing::warn!(vm = name, error = %e, "cannot read VM state, purging");
                machine.purge(name).await?;
            }
        }
    }
    untrust(machine).await;
    machine.ui.say("devbox VM has been destroyed");
    Ok(())
}

/// Drop the host's trust in a certificate authority that no longer exists.
async fn untrust(machine: &Machine) {
    if let Err(e) = machine.trust.unstore().await {
        tracing::warn!(error = %e, "could not remove trusted devbox certificate");
    }
}

pub async fn trust(machine: &Machine) -> Result<(), DevboxError> {
    let state = current_state(machine).await?;
    machine.trust(&state).await
}

pub async fn debug(machine: &Machine) -> Result<(), DevboxError> {
    let state = current_state(machine).await?;
    machine.debug(&state).await
}

// ── status ───────────────────────────────────────────────

#[derive(Facet)]
struct StatusJson {
    name: String,
    state: String,
    ip: Option<String>,
    domain: Option<String>,
    reason: Option<String>,
}

pub async fn status(machine: &Machine) -> Result<StatusReport, DevboxError> {
    let state = current_state(machine).await?;
    Ok(machine.status(&state))
}

pub fn render_status(report: &StatusReport, json: bool) -> Result<String, DevboxError> {
    if json {
        return facet_json::to_string(&StatusJson {
            name: report.name.clone(),
            state: report.state.to_string(),
            ip: report.ip.clone(),
            domain: report.domain.clone(),
            reason: report.reason.clone(),
        })
        .map_err(|e| DevboxError::Encode {
            what: "status".into(),
            message: e.to_string(),
        });
    }

    let mut out = format!("{} ({})", report.state, report.name);
    if let Some(domain) = &report.domain {
        out.push_str(&format!("\n  Domain: {domain}"));
    }
    if let Some(ip) = &report.ip {
        out.push_str(&format!("\n  IP: {ip}"));
    }
    if let Some(reason) = &report.reason {
        out.push_str(&format!("\n  Reason: {reason}"));
    }
    Ok(out)
}

// ── ssh ──────────────────────────────────────────────────

/// Open a shell (or run `args`) in the guest; returns the exit code.
pub async fn ssh(machine: &Machine, args: &[String]) -> Result<i32, DevboxError> {
    let state = current_state(machine).await?;
    match &state {
        VmState::Running(id) | VmState::Unprovisioned(id) => {
            ssh::interactive(
                &machine.config.config.ssh.user,
                &id.loopback(),
                &machine.config.private_key_path(),
                args,
            )
            .await
        }
        VmState::Invalid { reason, .. } => Err(DevboxError::InvalidVm {
            reason: reason.clone(),
        }),
        other => Err(DevboxError::Precondition {
            message: format!("devbox is not running (currently: {})", other.label()),
        }),
    }
}
