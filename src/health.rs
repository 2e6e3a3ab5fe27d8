//! Guest health check.
//!
//! The same command is sent over both SSH routes at once. The first route
//! answering `ok` decides; a failing route waits for the other one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::lifecycle::Machine;
use crate::ssh::{SshAddress, SshTransport};
use crate::vm_state::VmIdentity;

const HEALTHY: &str = "ok";

/// Slack on top of the per-probe timeout before giving up on both.
const GRACE: Duration = Duration::from_secs(2);

/// True when the guest reports itself healthy on either route.
pub async fn check(machine: &Machine, identity: &VmIdentity) -> bool {
    probe_all(
        machine.ssh.clone(),
        identity.ssh_addresses(),
        machine.config.private_key_path(),
        machine.config.config.provision.health_check.clone(),
        machine.config.health_check_timeout(),
    )
    .await
}

pub async fn probe_all(
    ssh: Arc<dyn SshTransport>,
    addrs: impl IntoIterator<Item = SshAddress>,
    key: PathBuf,
    command: String,
    timeout: Duration,
) -> bool {
    let (tx, mut rx) = mpsc::channel(2);

    for addr in addrs {
        let tx = tx.clone();
        let ssh = ssh.clone();
        let key = key.clone();
        let command = command.clone();
        // Detached: a slow loser keeps running until its own timeout.
        tokio::spawn(async move {
            let healthy = match ssh.run_command(&command, &addr, &key, timeout).await {
                Ok(output) => output.trim() == HEALTHY,
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "health probe failed");
                    false
                }
            };
            let _ = tx.send(healthy).await;
        });
    }
    drop(tx);

    let first_success = async {
        while let Some(healthy) = rx.recv().await {
            if healthy {
                return true;
            }
        }
        false
    };

    tokio::time::timeout(timeout + GRACE, first_success)
        .await
        .unwrap_or(false)
}
