use super::{Machine, StartOpts, keys, provision, running_message};
use crate::address::Picker;
use crate::error::DevboxError;
use crate::paths;
use crate::ssh;
use crate::vm_state::VmIdentity;

/// Import, wire up and boot a VM that does not exist yet.
pub(super) async fn create_and_start(
    m: &Machine,
    name: &str,
    opts: &StartOpts,
) -> Result<(), DevboxError> {
    let total = m.host.total_memory_mb()?;
    let memory_mb = opts
        .memory_mb
        .unwrap_or_else(|| m.config.default_memory_mb(total));
    let cpus = opts
        .cpus
        .unwrap_or_else(|| m.config.default_cpus(m.host.cpus()));

    let image = opts
        .image_path
        .clone()
        .unwrap_or_else(|| m.config.default_ova_path());
    if !m.fs.exists(&image).await? {
        return Err(DevboxError::Precondition {
            message: format!("no VM image at {}; run `devbox download` first", image.display()),
        });
    }
    let insecure_key = m.config.insecure_key_path();
    if !m.fs.exists(&insecure_key).await? {
        return Err(DevboxError::Precondition {
            message: format!(
                "SSH key for the stock image not found at {}; set [ssh] insecure_key in config.toml",
                insecure_key.display()
            ),
        });
    }

    if !m.confirm_memory(memory_mb)? {
        return Ok(());
    }

    m.ui.say("Allocating network...");
    let reusable = m
        .driver
        .host_only_interfaces()
        .await
        .map_err(DevboxError::start)?;
    let network = Picker::new(&*m.network, &*m.driver)
        .select_available_interface(&reusable, opts.ip.as_deref(), opts.domain.as_deref())
        .await
        .map_err(DevboxError::start)?;
    tracing::info!(
        vm = name,
        subnet = %network.subnet,
        reuse = network.interface.exists,
        "network selected"
    );

    m.ui.say("Importing VM...");
    let base_folder = paths::vms_dir(&m.config.home);
    m.driver
        .import_vm(&image, name, &base_folder)
        .await
        .map_err(DevboxError::start)?;
    m.driver
        .set_memory(name, memory_mb)
        .await
        .map_err(DevboxError::start)?;
    m.driver
        .set_cpus(name, cpus)
        .await
        .map_err(DevboxError::start)?;

    let interface = if network.interface.exists {
        network.interface.name.clone()
    } else {
        m.driver
            .create_host_only_interface(&network.interface.ip)
            .await
            .map_err(DevboxError::start)?
    };
    m.driver
        .attach_interface(&interface, name)
        .await
        .map_err(DevboxError::start)?;

    let ssh_port = ssh::pick_free_port().map_err(DevboxError::start)?;
    m.driver
        .forward_port(name, "ssh", ssh_port, 22)
        .await
        .map_err(DevboxError::start)?;

    let identity = VmIdentity {
        name: name.to_string(),
        domain: network.vm_domain,
        ip: network.vm_ip,
        ssh_port,
    };

    m.ui.say("Starting VM...");
    m.driver.start_vm(name).await.map_err(DevboxError::start)?;

    let addr = m
        .ssh
        .wait_reachable(&identity.ssh_addresses(), &insecure_key, m.config.boot_timeout())
        .await
        .map_err(DevboxError::start)?;
    keys::install_generated_key(m, &addr)
        .await
        .map_err(DevboxError::start)?;

    if opts.no_provision {
        m.ui.say(&format!(
            "devbox is up at {} (provisioning skipped)",
            identity.domain
        ));
        return Ok(());
    }
    provision::provision_and_verify(m, &identity, opts).await?;
    m.ui.say(&running_message(&identity));
    Ok(())
}
