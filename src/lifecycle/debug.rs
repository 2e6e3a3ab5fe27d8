use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use super::Machine;
use crate::download::ByteStream;
use crate::error::DevboxError;
use crate::vm_state::VmIdentity;

const LOG_TIMEOUT: Duration = Duration::from_secs(60);

/// `(file name, guest command)` pairs gathered into the debug directory.
const GUEST_LOGS: &[(&str, &str)] = &[
    ("provision.log", "sudo cat /var/log/devbox/provision.log"),
    ("journal.log", "sudo journalctl --no-pager -n 1000"),
    ("network.txt", "ip addr"),
    ("disk.txt", "df -h"),
    ("processes.txt", "ps aux"),
];

fn one_chunk(text: String) -> ByteStream {
    Box::pin(futures_util::stream::once(async move {
        Ok::<_, DevboxError>(Bytes::from(text))
    }))
}

/// Gather guest logs and the hypervisor's view of the VM into a fresh
/// directory. A log that cannot be fetched is written as its error.
pub(super) async fn collect(m: &Machine, identity: &VmIdentity) -> Result<PathBuf, DevboxError> {
    let dir = m.config.debug_dir(&identity.name);
    m.fs.remove_dir(&dir).await?;
    m.fs.create_dir(&dir).await?;

    let key = m.config.private_key_path();
    let addr = identity.loopback();
    for (file, command) in GUEST_LOGS {
        let text = match m.ssh.run_command(command, &addr, &key, LOG_TIMEOUT).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(vm = %identity.name, file, error = %e, "could not collect guest log");
                format!("failed: {e}\n")
            }
        };
        m.fs.write(&dir.join(file), one_chunk(text), false).await?;
    }

    let info = match m.driver.describe_vm(&identity.name).await {
        Ok(info) => info,
        Err(e) => format!("failed: {e}\n"),
    };
    m.fs.write(&dir.join("vm-info.txt"), one_chunk(info), false)
        .await?;
    tracing::info!(vm = %identity.name, dir = %dir.display(), "debug logs collected");
    Ok(dir)
}
