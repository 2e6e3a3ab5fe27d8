//! The VM lifecycle state machine.
//!
//! Each verb is an exhaustive match over [`VmState`]; the table of what a
//! verb does in which state lives in the match arms below and nowhere else.

mod debug;
mod first_boot;
mod keys;
mod power;
mod provision;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::address;
use crate::backend::HypervisorDriver;
use crate::config::{MIN_MEMORY_MB, SystemConfig};
use crate::download::FileStore;
use crate::error::DevboxError;
use crate::network::NetworkProbe;
use crate::ssh::SshTransport;
use crate::system::HostResources;
use crate::trust::{self, TrustStore};
use crate::ui::Ui;
use crate::vm_state::{self, VmIdentity, VmState};

pub use provision::provision_command;

pub(crate) const NOT_CREATED: &str = "devbox VM has not been created";
const ALREADY_RUNNING: &str = "devbox is already running";
const NOT_PROVISIONED: &str = "Your VM is running but not provisioned. Run `devbox start` to provision it or `devbox destroy` to remove it.";
const CA_CERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the lifecycle talks to, injected once per invocation.
pub struct Machine {
    pub config: Arc<SystemConfig>,
    pub driver: Arc<dyn HypervisorDriver>,
    pub ssh: Arc<dyn SshTransport>,
    pub network: Arc<dyn NetworkProbe>,
    pub fs: Arc<dyn FileStore>,
    pub host: Arc<dyn HostResources>,
    pub trust: Arc<dyn TrustStore>,
    pub ui: Arc<dyn Ui>,
}

/// Options of `devbox start`.
#[derive(Debug, Clone, Default)]
pub struct StartOpts {
    pub memory_mb: Option<u64>,
    pub cpus: Option<u32>,
    /// Boot this OVA instead of the downloaded one.
    pub image_path: Option<PathBuf>,
    pub ip: Option<String>,
    pub domain: Option<String>,
    pub services: Option<String>,
    pub no_provision: bool,
    /// Only re-run provisioning on a VM that is already up.
    pub provision_only: bool,
}

/// What `devbox status` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub name: String,
    pub state: &'static str,
    pub ip: Option<String>,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

fn invalid(reason: &str) -> DevboxError {
    DevboxError::InvalidVm {
        reason: reason.to_string(),
    }
}

fn running_message(identity: &VmIdentity) -> String {
    format!("devbox is now running at {}", identity.domain)
}

impl Machine {
    pub async fn vm_state(&self, name: &str) -> Result<VmState, DevboxError> {
        vm_state::detect_state(self, name).await
    }

    /// State without asking the guest whether it is provisioned.
    pub async fn power_state(&self, name: &str) -> Result<VmState, DevboxError> {
        vm_state::detect_power_state(self, name).await
    }

    /// Reject start options that cannot apply to the VM as it is.
    pub fn verify_start_opts(&self, state: &VmState, opts: &StartOpts) -> Result<(), DevboxError> {
        let VmState::NotCreated { .. } = state else {
            if opts.memory_mb.is_some()
                || opts.cpus.is_some()
                || opts.ip.is_some()
                || opts.domain.is_some()
            {
                return Err(DevboxError::Validation {
                    message: "--memory, --cpus, --ip and --domain only apply when the VM is created; run `devbox destroy` first to change them".into(),
                });
            }
            return Ok(());
        };

        if let Some(memory) = opts.memory_mb {
            if memory < MIN_MEMORY_MB {
                return Err(DevboxError::Validation {
                    message: format!("devbox needs at least {MIN_MEMORY_MB} MB of memory"),
                });
            }
            let total = self.host.total_memory_mb()?;
            if memory > total {
                return Err(DevboxError::Validation {
                    message: format!("requested {memory} MB but the host only has {total} MB"),
                });
            }
        }
        if opts.cpus == Some(0) {
            return Err(DevboxError::Validation {
                message: "--cpus must be at least 1".into(),
            });
        }
        if let Some(ip) = &opts.ip {
            address::subnet_for_ip(ip)?;
        }
        if let Some(domain) = &opts.domain {
            address::subnet_for_domain(domain)?;
        }
        Ok(())
    }

    pub async fn start(&self, state: &VmState, opts: &StartOpts) -> Result<(), DevboxError> {
        match state {
            VmState::NotCreated { name } => first_boot::create_and_start(self, name, opts).await,
            VmState::Stopped(id) => power::boot_stopped(self, id, opts).await,
            VmState::Running(_) => {
                self.ui.say(ALREADY_RUNNING);
                Ok(())
            }
            VmState::Unprovisioned(id) => {
                if opts.no_provision {
                    self.ui.say(ALREADY_RUNNING);
                    return Ok(());
                }
                provision::provision_and_verify(self, id, opts).await?;
                self.ui.say(&running_message(id));
                Ok(())
            }
            VmState::Saved(id) => power::resume_saved(self, id).await,
            VmState::Paused(id) => power::resume_paused(self, id).await,
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    /// Re-run provisioning on a VM that is already up.
    pub async fn provision(&self, state: &VmState, opts: &StartOpts) -> Result<(), DevboxError> {
        match state {
            VmState::Running(id) | VmState::Unprovisioned(id) => {
                provision::provision_and_verify(self, id, opts).await?;
                self.ui.say(&running_message(id));
                Ok(())
            }
            VmState::NotCreated { .. }
            | VmState::Stopped(_)
            | VmState::Saved(_)
            | VmState::Paused(_) => Err(DevboxError::Precondition {
                message: format!(
                    "devbox must be running to be provisioned (currently: {})",
                    state.label()
                ),
            }),
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    pub async fn stop(&self, state: &VmState) -> Result<(), DevboxError> {
        match state {
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                Ok(())
            }
            VmState::Stopped(_) => {
                self.ui.say("devbox is already stopped");
                Ok(())
            }
            VmState::Running(id) | VmState::Unprovisioned(id) => power::stop(self, id).await,
            VmState::Saved(_) => {
                self.ui.say(
                    "Your VM is suspended. Resume it with `devbox resume` before stopping it.",
                );
                Ok(())
            }
            VmState::Paused(_) => {
                self.ui
                    .say("Your VM is paused. Resume it with `devbox resume` before stopping it.");
                Ok(())
            }
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    pub async fn suspend(&self, state: &VmState) -> Result<(), DevboxError> {
        match state {
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                Ok(())
            }
            VmState::Stopped(_) => {
                self.ui
                    .say("Your VM is currently stopped and cannot be suspended.");
                Ok(())
            }
            VmState::Running(id) => power::suspend(self, id).await,
            VmState::Unprovisioned(_) => {
                self.ui.say(NOT_PROVISIONED);
                Ok(())
            }
            VmState::Saved(_) => {
                self.ui.say("Your VM is suspended.");
                Ok(())
            }
            VmState::Paused(_) => {
                self.ui
                    .say("Your VM is paused. Resume it with `devbox resume` first.");
                Ok(())
            }
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    pub async fn resume(&self, state: &VmState) -> Result<(), DevboxError> {
        match state {
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                Ok(())
            }
            VmState::Stopped(_) => {
                self.ui.say(
                    "Your VM is currently stopped. Only a suspended VM can be resumed.",
                );
                Ok(())
            }
            VmState::Running(_) => {
                self.ui.say(ALREADY_RUNNING);
                Ok(())
            }
            VmState::Unprovisioned(_) => {
                self.ui.say(NOT_PROVISIONED);
                Ok(())
            }
            VmState::Saved(id) => power::resume_saved(self, id).await,
            VmState::Paused(id) => power::resume_paused(self, id).await,
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    pub async fn destroy(&self, state: &VmState) -> Result<(), DevboxError> {
        let name = state.name();
        let result = match state {
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                return Ok(());
            }
            VmState::Stopped(_) | VmState::Saved(_) => self.unregister(name).await,
            VmState::Running(_) | VmState::Unprovisioned(_) | VmState::Paused(_) => {
                match self.driver.power_off_vm(name).await {
                    Ok(()) => self.unregister(name).await,
                    Err(e) => Err(e),
                }
            }
            VmState::Invalid { reason, .. } => return Err(invalid(reason)),
        };
        result.map_err(|reason| DevboxError::DestroyVm {
            name: name.to_string(),
            reason: Box::new(reason),
        })
    }

    /// Fetch the guest's CA certificate and trust it on the host.
    pub async fn trust(&self, state: &VmState) -> Result<(), DevboxError> {
        match state {
            VmState::Running(id) => {
                self.trust_guest_ca(id)
                    .await
                    .map_err(|e| DevboxError::TrustCert(Box::new(e)))?;
                self.ui.say("devbox certificate is now trusted");
                Ok(())
            }
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                Ok(())
            }
            VmState::Unprovisioned(_) => {
                self.ui.say(NOT_PROVISIONED);
                Ok(())
            }
            VmState::Stopped(_) | VmState::Saved(_) | VmState::Paused(_) => {
                Err(DevboxError::Precondition {
                    message: format!(
                        "devbox must be running to trust its certificate (currently: {})",
                        state.label()
                    ),
                })
            }
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    async fn trust_guest_ca(&self, identity: &VmIdentity) -> Result<(), DevboxError> {
        let output = self
            .ssh
            .run_command(
                &self.config.config.provision.ca_cert_command,
                &identity.loopback(),
                &self.config.private_key_path(),
                CA_CERT_TIMEOUT,
            )
            .await?;
        let pem = trust::extract_certificate(&output)?;
        tracing::debug!(vm = %identity.name, "fetched guest CA certificate");
        self.trust.store(&pem).await
    }

    /// Write guest logs under the devbox home for a bug report.
    pub async fn debug(&self, state: &VmState) -> Result<(), DevboxError> {
        match state {
            VmState::Running(id) | VmState::Unprovisioned(id) => {
                let dir = debug::collect(self, id).await?;
                self.ui
                    .say(&format!("Debug logs written to {}", dir.display()));
                Ok(())
            }
            VmState::NotCreated { .. } => {
                self.ui.say(NOT_CREATED);
                Ok(())
            }
            VmState::Stopped(_) | VmState::Saved(_) | VmState::Paused(_) => {
                Err(DevboxError::Precondition {
                    message: format!(
                        "devbox must be running to collect debug logs (currently: {})",
                        state.label()
                    ),
                })
            }
            VmState::Invalid { reason, .. } => Err(invalid(reason)),
        }
    }

    /// Remove a VM whatever condition it is in. Recovery path for VMs that
    /// cannot be driven through the regular verbs.
    pub async fn purge(&self, name: &str) -> Result<(), DevboxError> {
        if let Err(e) = self.driver.power_off_vm(name).await {
            tracing::debug!(vm = name, error = %e, "power off before purge failed");
        }
        let result = match self.driver.vm_status(name).await {
            Ok(crate::backend::VmStatus::NotCreated) => {
                self.fs.remove_dir(&self.config.vm_files_dir(name)).await
            }
            _ => self.unregister(name).await,
        };
        result.map_err(|reason| DevboxError::DestroyVm {
            name: name.to_string(),
            reason: Box::new(reason),
        })
    }

    async fn unregister(&self, name: &str) -> Result<(), DevboxError> {
        self.driver.destroy_vm(name).await?;
        self.fs.remove_dir(&self.config.vm_files_dir(name)).await
    }

    pub fn status(&self, state: &VmState) -> StatusReport {
        let identity = state.identity();
        StatusReport {
            name: state.name().to_string(),
            state: state.label(),
            ip: identity.map(|id| id.ip.clone()),
            domain: identity.map(|id| id.domain.clone()),
            reason: match state {
                VmState::Invalid { reason, .. } => Some(reason.clone()),
                _ => None,
            },
        }
    }

    /// Ask before booting with more memory than the host has free.
    /// `Ok(false)` means the user declined.
    fn confirm_memory(&self, memory_mb: u64) -> Result<bool, DevboxError> {
        let free = self.host.free_memory_mb()?;
        if free >= memory_mb {
            return Ok(true);
        }
        let go = self.ui.confirm(&format!(
            "Less than {memory_mb} MB of free memory detected, continue?"
        ))?;
        if !go {
            self.ui.say("Exiting...");
        }
        Ok(go)
    }
}
