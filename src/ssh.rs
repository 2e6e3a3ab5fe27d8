//! Command execution inside the guest over SSH, plus the key material it needs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

use crate::error::DevboxError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAddress {
    pub ip: String,
    pub port: u16,
}

impl SshAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for SshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Run `command` and return its stdout. Fails with `Timeout` once
    /// `timeout` passes, whatever the remote side is doing.
    async fn run_command(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        timeout: Duration,
    ) -> Result<String, DevboxError>;

    /// Like `run_command`, but the remote output goes straight to the terminal.
    async fn run_streaming(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        timeout: Duration,
    ) -> Result<(), DevboxError>;

    /// Poll `addrs` in order until one accepts a command; returns that address.
    async fn wait_reachable(
        &self,
        addrs: &[SshAddress],
        key: &Path,
        timeout: Duration,
    ) -> Result<SshAddress, DevboxError> {
        let (addr, _) = self.wait_reachable_with(addrs, &[key], timeout).await?;
        Ok(addr)
    }

    /// Like `wait_reachable`, trying each key on each address. Returns the
    /// address and the key that got in.
    async fn wait_reachable_with(
        &self,
        addrs: &[SshAddress],
        keys: &[&Path],
        timeout: Duration,
    ) -> Result<(SshAddress, PathBuf), DevboxError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || DevboxError::Timeout {
            operation: "waiting for SSH".into(),
            secs: timeout.as_secs(),
        };
        loop {
            for addr in addrs {
                for key in keys {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(timed_out());
                    }
                    match self
                        .run_command("true", addr, key, remaining.min(PROBE_TIMEOUT))
                        .await
                    {
                        Ok(_) => return Ok((addr.clone(), key.to_path_buf())),
                        Err(e) => {
                            tracing::debug!(%addr, key = %key.display(), error = %e, "not reachable yet")
                        }
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            tokio::time::sleep(remaining.min(RETRY_DELAY)).await;
        }
    }
}

// ── SystemSsh ────────────────────────────────────────────

/// Drives the host's OpenSSH client.
pub struct SystemSsh {
    user: String,
}

impl SystemSsh {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    fn command(&self, addr: &SshAddress, key: &Path, connect_timeout: Duration) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(ssh_args(&self.user, addr, key, connect_timeout, true));
        cmd.kill_on_drop(true);
        cmd
    }
}

fn ssh_args(
    user: &str,
    addr: &SshAddress,
    key: &Path,
    connect_timeout: Duration,
    batch: bool,
) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        key.display().to_string(),
        "-p".to_string(),
        addr.port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
    ];
    if batch {
        args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
    }
    args.push(format!("{user}@{}", addr.ip));
    args
}

fn timeout_error(addr: &SshAddress, timeout: Duration) -> DevboxError {
    DevboxError::Timeout {
        operation: format!("ssh connection to {addr}"),
        secs: timeout.as_secs(),
    }
}

#[async_trait]
impl SshTransport for SystemSsh {
    async fn run_command(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        timeout: Duration,
    ) -> Result<String, DevboxError> {
        let mut cmd = self.command(addr, key, timeout);
        cmd.arg(command).stdin(Stdio::null());

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| timeout_error(addr, timeout))?
            .map_err(|e| DevboxError::Transport {
                context: format!("ssh {addr}"),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DevboxError::Transport {
                context: format!("running '{command}' on {addr}"),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_streaming(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        timeout: Duration,
    ) -> Result<(), DevboxError> {
        let mut cmd = self.command(addr, key, PROBE_TIMEOUT);
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = tokio::time::timeout(timeout, cmd.status())
            .await
            .map_err(|_| timeout_error(addr, timeout))?
            .map_err(|e| DevboxError::Transport {
                context: format!("ssh {addr}"),
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(DevboxError::Transport {
                context: format!("running '{command}' on {addr}"),
                message: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Interactive session with the terminal attached. Returns the exit code.
pub async fn interactive(
    user: &str,
    addr: &SshAddress,
    key: &Path,
    extra: &[String],
) -> Result<i32, DevboxError> {
    let status = Command::new("ssh")
        .args(ssh_args(user, addr, key, PROBE_TIMEOUT, false))
        .args(extra)
        .status()
        .await
        .map_err(|e| DevboxError::ExternalCommand {
            command: "ssh".into(),
            message: e.to_string(),
        })?;
    Ok(status.code().unwrap_or(1))
}

// ── keys ─────────────────────────────────────────────────

pub fn public_key_path(private: &Path) -> PathBuf {
    private.with_extension("pub")
}

/// Make sure an Ed25519 key pair exists at `private`; returns the public key
/// in `authorized_keys` format.
pub async fn ensure_key_pair(private: &Path) -> Result<String, DevboxError> {
    let public = public_key_path(private);
    if private.exists() && public.exists() {
        let line = tokio::fs::read_to_string(&public)
            .await
            .map_err(|e| DevboxError::io(format!("reading {}", public.display()), e))?;
        return Ok(line.trim().to_string());
    }

    let key = ssh_key::PrivateKey::random(&mut rand_core::OsRng, ssh_key::Algorithm::Ed25519)
        .map_err(|e| DevboxError::SshKey {
            message: e.to_string(),
        })?;
    let private_pem = key
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| DevboxError::SshKey {
            message: e.to_string(),
        })?;
    let public_line = key
        .public_key()
        .to_openssh()
        .map_err(|e| DevboxError::SshKey {
            message: e.to_string(),
        })?;

    if let Some(parent) = private.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DevboxError::io(format!("creating {}", parent.display()), e))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(private)
        .await
        .map_err(|e| DevboxError::io(format!("creating {}", private.display()), e))?;
    tokio::io::AsyncWriteExt::write_all(&mut file, private_pem.as_bytes())
        .await
        .map_err(|e| DevboxError::io(format!("writing {}", private.display()), e))?;

    tokio::fs::write(&public, format!("{public_line}\n"))
        .await
        .map_err(|e| DevboxError::io(format!("writing {}", public.display()), e))?;

    tracing::info!(path = %private.display(), "generated SSH key pair");
    Ok(public_line)
}

/// Shell snippet that makes `public_key` the only authorized key.
pub fn install_key_command(public_key: &str) -> String {
    format!(
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo '{public_key}' > ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys"
    )
}

/// A loopback port nothing listens on right now.
pub fn pick_free_port() -> Result<u16, DevboxError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| DevboxError::io("reserving a local port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| DevboxError::io("reading reserved port", e))?
        .port();
    Ok(port)
}
