//! Host trust for the guest's certificate authority.
//!
//! The guest serves its routes over TLS with certificates signed by its own
//! CA. Trusting that CA on the host makes browsers and CLIs accept them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::DevboxError;

const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const LINUX_ANCHOR: &str = "/usr/local/share/ca-certificates/devbox.crt";

#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Trust `pem` on this host, replacing whatever an earlier call stored.
    async fn store(&self, pem: &str) -> Result<(), DevboxError>;
    /// Undo `store`. Nothing stored is not an error.
    async fn unstore(&self) -> Result<(), DevboxError>;
}

/// Check that `output` holds a PEM certificate and trim anything around it.
pub fn extract_certificate(output: &str) -> Result<String, DevboxError> {
    let start = output.find(PEM_HEADER).ok_or_else(|| DevboxError::Precondition {
        message: "the guest did not return a PEM certificate".into(),
    })?;
    Ok(format!("{}\n", output[start..].trim_end()))
}

// ── SystemTrustStore ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Keeps a copy of the certificate under the devbox home and registers it
/// with the operating system's trust store.
pub struct SystemTrustStore {
    cert_path: PathBuf,
    platform: Platform,
}

impl SystemTrustStore {
    pub fn new(cert_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            platform: Platform::current(),
        }
    }
}

/// Commands registering `cert` with the host.
pub fn store_commands(platform: Platform, cert: &Path) -> Vec<Vec<String>> {
    let cert = cert.display().to_string();
    match platform {
        Platform::Linux => vec![
            vec!["sudo".into(), "cp".into(), cert, LINUX_ANCHOR.into()],
            vec!["sudo".into(), "update-ca-certificates".into()],
        ],
        Platform::MacOs => vec![vec![
            "security".into(),
            "add-trusted-cert".into(),
            "-r".into(),
            "trustRoot".into(),
            cert,
        ]],
    }
}

/// Commands reverting `store_commands`.
pub fn unstore_commands(platform: Platform, cert: &Path) -> Vec<Vec<String>> {
    match platform {
        Platform::Linux => vec![
            vec!["sudo".into(), "rm".into(), "-f".into(), LINUX_ANCHOR.into()],
            vec![
                "sudo".into(),
                "update-ca-certificates".into(),
                "--fresh".into(),
            ],
        ],
        Platform::MacOs => vec![vec![
            "security".into(),
            "remove-trusted-cert".into(),
            cert.display().to_string(),
        ]],
    }
}

async fn run_all(commands: Vec<Vec<String>>) -> Result<(), DevboxError> {
    for argv in commands {
        let Some((program, args)) = argv.split_first() else {
            continue;
        };
        let command = argv.join(" ");
        tracing::debug!(%command, "running");
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| DevboxError::ExternalCommand {
                command: command.clone(),
                message: e.to_string(),
            })?;
        if !status.success() {
            return Err(DevboxError::ExternalCommand {
                command,
                message: status.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl TrustStore for SystemTrustStore {
    async fn store(&self, pem: &str) -> Result<(), DevboxError> {
        if let Some(parent) = self.cert_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DevboxError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::write(&self.cert_path, pem)
            .await
            .map_err(|e| DevboxError::io(format!("writing {}", self.cert_path.display()), e))?;
        run_all(store_commands(self.platform, &self.cert_path)).await?;
        tracing::info!(path = %self.cert_path.display(), "certificate trusted");
        Ok(())
    }

    async fn unstore(&self) -> Result<(), DevboxError> {
        if !self.cert_path.exists() {
            return Ok(());
        }
        run_all(unstore_commands(self.platform, &self.cert_path)).await?;
        tokio::fs::remove_file(&self.cert_path)
            .await
            .map_err(|e| DevboxError::io(format!("removing {}", self.cert_path.display()), e))?;
        tracing::info!("certificate no longer trusted");
        Ok(())
    }
}
