use super::{Machine, StartOpts, keys};
use crate::config::SystemConfig;
use crate::error::DevboxError;
use crate::health;
use crate::vm_state::VmIdentity;

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The guest-side provisioning command line.
///
/// Host proxy settings are exported first so the provisioner sees them.
pub fn provision_command(config: &SystemConfig, identity: &VmIdentity, services: &str) -> String {
    let mut parts: Vec<String> = config
        .proxies
        .env_assignments()
        .into_iter()
        .filter_map(|assignment| {
            let (key, value) = assignment.split_once('=')?;
            Some(format!("export {key}={};", shell_quote(value)))
        })
        .collect();
    parts.push(config.config.provision.command.clone());
    parts.extend(
        [identity.domain.as_str(), identity.ip.as_str(), services]
            .into_iter()
            .map(shell_quote),
    );
    parts.join(" ")
}

/// Run the provisioner, then insist on a healthy guest.
pub(super) async fn provision_and_verify(
    m: &Machine,
    identity: &VmIdentity,
    opts: &StartOpts,
) -> Result<(), DevboxError> {
    let services = opts
        .services
        .as_deref()
        .unwrap_or(&m.config.config.provision.services);
    let command = provision_command(&m.config, identity, services);
    tracing::debug!(vm = %identity.name, %command, "provisioning");

    m.ui.say("Provisioning VM...");
    keys::ensure_guest_key(m, identity)
        .await
        .map_err(DevboxError::provision)?;
    m.ssh
        .run_streaming(
            &command,
            &identity.loopback(),
            &m.config.private_key_path(),
            m.config.provision_timeout(),
        )
        .await
        .map_err(DevboxError::provision)?;

    if !health::check(m, identity).await {
        return Err(DevboxError::Precondition {
            message: "the guest health check did not report ok".into(),
        }
        .provision());
    }
    Ok(())
}
