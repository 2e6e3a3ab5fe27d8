use std::time::Duration;

use tokio::time::Instant;

use super::{Machine, StartOpts, keys, provision, running_message};
use crate::backend::VmStatus;
use crate::error::DevboxError;
use crate::progress;
use crate::vm_state::VmIdentity;

/// How long an ACPI shutdown may take before the VM is powered off.
const STOP_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Boot an existing, powered-off VM.
pub(super) async fn boot_stopped(
    m: &Machine,
    id: &VmIdentity,
    opts: &StartOpts,
) -> Result<(), DevboxError> {
    let total = m.host.total_memory_mb()?;
    if !m.confirm_memory(m.config.default_memory_mb(total))? {
        return Ok(());
    }

    m.ui.say("Starting VM...");
    m.driver.start_vm(&id.name).await.map_err(DevboxError::start)?;
    keys::wait_for_guest(m, id)
        .await
        .map_err(DevboxError::start)?;

    if opts.no_provision {
        m.ui.say(&format!(
            "devbox is up at {} (provisioning skipped)",
            id.domain
        ));
        return Ok(());
    }
    provision::provision_and_verify(m, id, opts).await?;
    m.ui.say(&running_message(id));
    Ok(())
}

/// Graceful shutdown, forced once `STOP_TIMEOUT` passes.
pub(super) async fn stop(m: &Machine, id: &VmIdentity) -> Result<(), DevboxError> {
    let wrap = |e: DevboxError| DevboxError::StopVm(Box::new(e));

    m.ui.say("Stopping VM...");
    m.driver.stop_vm(&id.name).await.map_err(wrap)?;

    let spinner = progress::spinner("waiting for the guest to shut down");
    let deadline = Instant::now() + STOP_TIMEOUT;
    let mut stopped = false;
    while Instant::now() < deadline {
        if m.driver.vm_status(&id.name).await.map_err(wrap)? == VmStatus::Stopped {
            stopped = true;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    spinner.finish_and_clear();

    if !stopped {
        tracing::warn!(vm = %id.name, "graceful shutdown timed out, powering off");
        m.driver.power_off_vm(&id.name).await.map_err(wrap)?;
    }
    m.ui.say("devbox is now stopped");
    Ok(())
}

pub(super) async fn suspend(m: &Machine, id: &VmIdentity) -> Result<(), DevboxError> {
    m.ui.say("Suspending VM...");
    m.driver
        .suspend_vm(&id.name)
        .await
        .map_err(|e| DevboxError::SuspendVm(Box::new(e)))?;
    m.ui.say("devbox is now suspended");
    Ok(())
}

pub(super) async fn resume_saved(m: &Machine, id: &VmIdentity) -> Result<(), DevboxError> {
    m.ui.say("Resuming VM...");
    m.driver
        .resume_vm(&id.name)
        .await
        .map_err(|e| DevboxError::ResumeVm(Box::new(e)))?;
    m.ui.say(&running_message(id));
    Ok(())
}

pub(super) async fn resume_paused(m: &Machine, id: &VmIdentity) -> Result<(), DevboxError> {
    m.ui.say("Resuming VM...");
    m.driver
        .resume_paused_vm(&id.name)
        .await
        .map_err(|e| DevboxError::ResumeVm(Box::new(e)))?;
    m.ui.say(&running_message(id));
    Ok(())
}
