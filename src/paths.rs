use std::path::{Path, PathBuf};

/// Environment variable that relocates all devbox state.
pub const HOME_ENV: &str = "DEVBOX_HOME";

/// Root of all devbox state: `$DEVBOX_HOME`, or `~/.devbox/`
pub fn home_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".devbox")
}

/// Optional user config: `<home>/config.toml`
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Downloaded images: `<home>/ova/`
pub fn ova_dir(home: &Path) -> PathBuf {
    home.join("ova")
}

/// Finished image for a VM name: `<home>/ova/<name>.ova`
pub fn ova_path(home: &Path, vm_name: &str) -> PathBuf {
    ova_dir(home).join(format!("{vm_name}.ova"))
}

/// In-progress download next to its target: `<target>.partial`
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Base folder handed to the hypervisor on import: `<home>/vms/`
pub fn vms_dir(home: &Path) -> PathBuf {
    home.join("vms")
}

/// Files of one imported VM: `<home>/vms/<name>/`
pub fn vm_files_dir(home: &Path, vm_name: &str) -> PathBuf {
    vms_dir(home).join(vm_name)
}

/// Generated SSH private key; the public half sits next to it as `key.pub`.
pub fn private_key_path(home: &Path) -> PathBuf {
    vms_dir(home).join("key")
}

/// Key the stock image accepts before the generated key is installed.
pub fn insecure_key_path(home: &Path) -> PathBuf {
    home.join("insecure.key")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    home.join("logs")
}

/// Collected guest logs: `<home>/debug/`
pub fn debug_dir(home: &Path) -> PathBuf {
    home.join("debug")
}

/// Host copy of the guest's CA certificate.
pub fn ca_cert_path(home: &Path) -> PathBuf {
    home.join("trust").join("devbox-ca.crt")
}
