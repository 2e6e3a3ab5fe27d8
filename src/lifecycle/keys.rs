//! Getting the generated SSH key onto the guest.
//!
//! A fresh image only knows the stock insecure key. The generated key is
//! installed once the guest answers; until then the stock key is the way in.

use std::time::Duration;

use super::Machine;
use crate::error::DevboxError;
use crate::ssh::{self, SshAddress};
use crate::vm_state::VmIdentity;

const INSTALL_KEY_TIMEOUT: Duration = Duration::from_secs(30);
const KEY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Replace the guest's authorized keys with the generated public key,
/// logging in with the stock key.
pub(super) async fn install_generated_key(m: &Machine, addr: &SshAddress) -> Result<(), DevboxError> {
    let public_key = ssh::ensure_key_pair(&m.config.private_key_path()).await?;
    m.ssh
        .run_command(
            &ssh::install_key_command(&public_key),
            addr,
            &m.config.insecure_key_path(),
            INSTALL_KEY_TIMEOUT,
        )
        .await?;
    tracing::info!(%addr, "installed generated SSH key");
    Ok(())
}

/// Wait for a booting guest, accepting either key. Installs the generated
/// key when only the stock one gets in.
pub(super) async fn wait_for_guest(m: &Machine, id: &VmIdentity) -> Result<SshAddress, DevboxError> {
    let private_key = m.config.private_key_path();
    let insecure_key = m.config.insecure_key_path();
    let (addr, key) = m
        .ssh
        .wait_reachable_with(
            &id.ssh_addresses(),
            &[private_key.as_path(), insecure_key.as_path()],
            m.config.boot_timeout(),
        )
        .await?;
    if key == insecure_key {
        tracing::warn!(vm = %id.name, "guest still on the stock key");
        install_generated_key(m, &addr).await?;
    }
    Ok(addr)
}

/// Make sure a running guest accepts the generated key.
pub(super) async fn ensure_guest_key(m: &Machine, id: &VmIdentity) -> Result<(), DevboxError> {
    let addr = id.loopback();
    match m
        .ssh
        .run_command("true", &addr, &m.config.private_key_path(), KEY_CHECK_TIMEOUT)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(vm = %id.name, error = %e, "generated key refused, trying the stock key");
            install_generated_key(m, &addr).await
        }
    }
}
