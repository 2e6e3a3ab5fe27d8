use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::error::DevboxError;
use crate::paths;

/// Smallest amount of guest memory the image can run with.
pub const MIN_MEMORY_MB: u64 = 3072;
/// Upper bound of the memory picked when the user does not ask for any.
pub const MAX_DEFAULT_MEMORY_MB: u64 = 4096;

/// Every devbox VM name starts with this; anything else is not ours.
pub const VM_NAME_PREFIX: &str = "devbox-";
/// VM name used when the user boots their own image.
pub const CUSTOM_VM_NAME: &str = "devbox-custom";

/// Overrides `[image] token`.
pub const TOKEN_ENV: &str = "DEVBOX_TOKEN";

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub image: ImageConfig,
    #[facet(default)]
    pub resources: ResourcesConfig,
    #[facet(default)]
    pub ssh: SshConfig,
    #[facet(default)]
    pub download: DownloadConfig,
    #[facet(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ImageConfig {
    #[facet(default)]
    pub url: String,
    #[facet(default)]
    pub md5: String,
    #[facet(default)]
    pub token: String,
    /// Name of the VM created from the downloaded image.
    #[facet(default = "devbox-v1")]
    pub name: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            md5: String::new(),
            token: String::new(),
            name: "devbox-v1".into(),
        }
    }
}

/// Zero means "pick for me".
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ResourcesConfig {
    #[facet(default)]
    pub cpus: u32,
    #[facet(default)]
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SshConfig {
    #[facet(default = "devbox")]
    pub user: String,
    /// Defaults to `<home>/insecure.key`.
    #[facet(default)]
    pub insecure_key: String,
    #[facet(default = 20)]
    pub health_check_timeout_s: u64,
    #[facet(default = 300)]
    pub boot_timeout_s: u64,
    #[facet(default = 1200)]
    pub provision_timeout_s: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "devbox".into(),
            insecure_key: String::new(),
            health_check_timeout_s: 20,
            boot_timeout_s: 300,
            provision_timeout_s: 1200,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct DownloadConfig {
    #[facet(default = 30)]
    pub connect_timeout_s: u64,
    #[facet(default = 60)]
    pub idle_timeout_s: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_s: 30,
            idle_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ProvisionConfig {
    #[facet(default = "sudo -E -H /var/devbox/run")]
    pub command: String,
    #[facet(default = "sudo /var/devbox/health-check")]
    pub health_check: String,
    #[facet(default = "default")]
    pub services: String,
    /// Prints the guest's CA certificate.
    #[facet(default = "sudo cat /var/devbox/ca.crt")]
    pub ca_cert_command: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            command: "sudo -E -H /var/devbox/run".into(),
            health_check: "sudo /var/devbox/health-check".into(),
            services: "default".into(),
            ca_cert_command: "sudo cat /var/devbox/ca.crt".into(),
        }
    }
}

// ── Proxies ──────────────────────────────────────────────

/// Proxy settings picked up from the host environment and handed to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxies {
    pub http: String,
    pub https: String,
    pub no_proxy: String,
}

impl Proxies {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .map(|v| v.chars().filter(|c| !c.is_whitespace()).collect())
                .unwrap_or_default()
        };
        Self {
            http: read("HTTP_PROXY", "http_proxy"),
            https: read("HTTPS_PROXY", "https_proxy"),
            no_proxy: read("NO_PROXY", "no_proxy"),
        }
    }

    /// `KEY=value` assignments for the non-empty settings.
    pub fn env_assignments(&self) -> Vec<String> {
        [
            ("HTTP_PROXY", &self.http),
            ("HTTPS_PROXY", &self.https),
            ("NO_PROXY", &self.no_proxy),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect()
    }
}

// ── SystemConfig ──────────────────────────────────────────

/// Resolved runtime config: the parsed file plus everything derived from the host.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub home: PathBuf,
    pub config: Config,
    pub proxies: Proxies,
}

impl SystemConfig {
    pub fn default_vm_name(&self) -> &str {
        &self.config.image.name
    }

    pub fn default_ova_path(&self) -> PathBuf {
        paths::ova_path(&self.home, self.default_vm_name())
    }

    pub fn private_key_path(&self) -> PathBuf {
        paths::private_key_path(&self.home)
    }

    pub fn insecure_key_path(&self) -> PathBuf {
        if self.config.ssh.insecure_key.is_empty() {
            paths::insecure_key_path(&self.home)
        } else {
            PathBuf::from(&self.config.ssh.insecure_key)
        }
    }

    pub fn vm_files_dir(&self, vm_name: &str) -> PathBuf {
        paths::vm_files_dir(&self.home, vm_name)
    }

    pub fn debug_dir(&self, vm_name: &str) -> PathBuf {
        paths::debug_dir(&self.home).join(vm_name)
    }

    /// Token for the image source, with the environment taking precedence.
    pub fn image_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| Some(self.config.image.token.clone()).filter(|t| !t.is_empty()))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ssh.health_check_timeout_s)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ssh.boot_timeout_s)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ssh.provision_timeout_s)
    }

    /// Memory for a new VM when the user gave none.
    pub fn default_memory_mb(&self, total_mb: u64) -> u64 {
        if self.config.resources.memory_mb > 0 {
            self.config.resources.memory_mb
        } else {
            default_memory_mb(total_mb)
        }
    }

    pub fn default_cpus(&self, host_cpus: u32) -> u32 {
        if self.config.resources.cpus > 0 {
            self.config.resources.cpus
        } else {
            host_cpus.clamp(1, 4)
        }
    }
}

/// Half the host memory, kept within `[MIN_MEMORY_MB, MAX_DEFAULT_MEMORY_MB]`.
pub fn default_memory_mb(total_mb: u64) -> u64 {
    (total_mb / 2).clamp(MIN_MEMORY_MB, MAX_DEFAULT_MEMORY_MB)
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), DevboxError> {
    if !config.image.name.starts_with(VM_NAME_PREFIX) {
        return Err(DevboxError::Validation {
            message: format!(
                "image name must start with '{VM_NAME_PREFIX}' (got '{}')",
                config.image.name
            ),
        });
    }
    if config.image.name == CUSTOM_VM_NAME {
        return Err(DevboxError::Validation {
            message: format!("image name '{CUSTOM_VM_NAME}' is reserved for custom images"),
        });
    }
    if config.resources.memory_mb != 0 && config.resources.memory_mb < MIN_MEMORY_MB {
        return Err(DevboxError::Validation {
            message: format!("memory_mb must be at least {MIN_MEMORY_MB}"),
        });
    }
    if !config.image.md5.is_empty()
        && (config.image.md5.len() != 32 || !config.image.md5.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return Err(DevboxError::Validation {
            message: "image md5 must be 32 hex characters".into(),
        });
    }
    if config.ssh.health_check_timeout_s == 0 {
        return Err(DevboxError::Validation {
            message: "health_check_timeout_s must be greater than 0".into(),
        });
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, DevboxError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| DevboxError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load `<home>/config.toml`; a missing file means all defaults.
pub fn load_config(home: &Path) -> Result<SystemConfig, DevboxError> {
    let path = paths::config_path(home);
    let config = match std::fs::read_to_string(&path) {
        Ok(contents) => parse_config(&contents, &path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(source) => {
            return Err(DevboxError::ConfigLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };

    Ok(SystemConfig {
        home: home.to_path_buf(),
        config,
        proxies: Proxies::from_env(),
    })
}
