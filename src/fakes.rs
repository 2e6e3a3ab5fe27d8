//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tempfile::TempDir;

use crate::address;
use crate::backend::{HypervisorDriver, VmStatus};
use crate::config::{Config, Proxies, SystemConfig};
use crate::download::{ByteStream, Fetched, FileStore, ImageSource};
use crate::error::DevboxError;
use crate::lifecycle::Machine;
use crate::network::{InterfaceUsage, NetworkInterface, NetworkProbe};
use crate::ssh::{SshAddress, SshTransport};
use crate::system::HostResources;
use crate::trust::TrustStore;
use crate::ui::Ui;
use crate::vm_state::VmIdentity;

fn not_found(path: &Path) -> DevboxError {
    DevboxError::io(
        format!("reading {}", path.display()),
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
    )
}

// ── FakeFs ───────────────────────────────────────────────

#[derive(Default)]
struct FileEntry {
    len: u64,
    md5: String,
    data: Vec<u8>,
}

/// Files are a length and a checksum; nothing is stored.
#[derive(Default)]
pub struct FakeFs {
    files: Mutex<BTreeMap<PathBuf, FileEntry>>,
    hashes: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: impl AsRef<Path>, len: u64, md5: &str) {
        self.files.lock().unwrap().insert(
            path.as_ref().to_path_buf(),
            FileEntry {
                len,
                md5: md5.to_string(),
                data: Vec::new(),
            },
        );
    }

    pub fn has(&self, path: impl AsRef<Path>) -> bool {
        self.files.lock().unwrap().contains_key(path.as_ref())
    }

    /// Bytes written to `path` through `write`.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        let files = self.files.lock().unwrap();
        files
            .get(path.as_ref())
            .map(|f| String::from_utf8_lossy(&f.data).into_owned())
    }

    /// Checksums the written file takes on, one per `write`.
    pub fn hash_after_write(&self, hashes: Vec<&str>) {
        self.hashes
            .lock()
            .unwrap()
            .extend(hashes.into_iter().map(String::from));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FileStore for FakeFs {
    async fn exists(&self, path: &Path) -> Result<bool, DevboxError> {
        self.record(format!("exists {}", path.display()));
        Ok(self.has(path))
    }

    async fn md5(&self, path: &Path) -> Result<String, DevboxError> {
        self.record(format!("md5 {}", path.display()));
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .map(|f| f.md5.clone())
            .ok_or_else(|| not_found(path))
    }

    async fn length(&self, path: &Path) -> Result<u64, DevboxError> {
        self.record(format!("length {}", path.display()));
        let files = self.files.lock().unwrap();
        files.get(path).map(|f| f.len).ok_or_else(|| not_found(path))
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DevboxError> {
        self.record(format!("move {} {}", from.display(), to.display()));
        let mut files = self.files.lock().unwrap();
        let entry = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<(), DevboxError> {
        self.record(format!("remove {}", path.display()));
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn create_dir(&self, path: &Path) -> Result<(), DevboxError> {
        self.record(format!("create_dir {}", path.display()));
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), DevboxError> {
        self.record(format!("remove_dir {}", path.display()));
        self.files.lock().unwrap().retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn delete_all_except(&self, dir: &Path, keep: &[String]) -> Result<(), DevboxError> {
        self.record(format!(
            "delete_all_except {} [{}]",
            dir.display(),
            keep.join(", ")
        ));
        self.files.lock().unwrap().retain(|p, _| {
            p.parent() != Some(dir)
                || p.file_name()
                    .is_some_and(|n| keep.iter().any(|k| n.to_string_lossy() == k.as_str()))
        });
        Ok(())
    }

    async fn write(&self, path: &Path, mut data: ByteStream, append: bool) -> Result<(), DevboxError> {
        self.record(format!("write {} append={append}", path.display()));
        let mut written = Vec::new();
        while let Some(chunk) = data.next().await {
            written.extend_from_slice(&chunk?);
        }
        let md5 = self.hashes.lock().unwrap().pop_front().unwrap_or_default();
        let mut files = self.files.lock().unwrap();
        let (len, mut bytes) = match files.remove(path) {
            Some(f) if append => (f.len, f.data),
            _ => (0, Vec::new()),
        };
        let len = len + written.len() as u64;
        bytes.extend_from_slice(&written);
        files.insert(
            path.to_path_buf(),
            FileEntry {
                len,
                md5,
                data: bytes,
            },
        );
        Ok(())
    }
}

// ── FakeSource ───────────────────────────────────────────

/// Hands out one scripted body per fetch and remembers the offsets asked for.
pub struct FakeSource {
    bodies: Mutex<VecDeque<Result<Vec<u8>, DevboxError>>>,
    pub offsets: Mutex<Vec<u64>>,
    restarts: bool,
}

impl FakeSource {
    pub fn new(bodies: Vec<Result<Vec<u8>, DevboxError>>) -> Self {
        Self {
            bodies: Mutex::new(bodies.into()),
            offsets: Mutex::new(Vec::new()),
            restarts: false,
        }
    }

    /// Serve every body from offset 0, like a server without range support.
    pub fn restarting(mut self) -> Self {
        self.restarts = true;
        self
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn fetch(&self, offset: u64) -> Result<Fetched, DevboxError> {
        self.offsets.lock().unwrap().push(offset);
        let body = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(DevboxError::Transport {
                    context: "fake source".into(),
                    message: "no more bodies".into(),
                })
            })?;
        let chunks: Vec<Result<Bytes, DevboxError>> = vec![Ok(Bytes::from(body))];
        Ok(Fetched {
            start: if self.restarts { 0 } else { offset },
            body: Box::pin(futures_util::stream::iter(chunks)),
        })
    }
}

// ── FakeDriver ───────────────────────────────────────────

#[derive(Default)]
struct DriverState {
    vms: BTreeMap<String, VmStatus>,
    ips: HashMap<String, String>,
    ports: HashMap<String, u16>,
    unknown: HashMap<String, String>,
    host_only: Vec<NetworkInterface>,
    in_use: HashSet<String>,
    failures: HashMap<String, String>,
    ignore_acpi: bool,
    calls: Vec<String>,
}

/// A hypervisor holding VMs in a map.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<DriverState>,
}

impl FakeDriver {
    pub const IP: &'static str = "192.168.11.11";
    pub const SSH_PORT: u16 = 50022;

    pub fn add_vm(&self, name: &str, status: VmStatus) {
        let mut s = self.state.lock().unwrap();
        s.vms.insert(name.to_string(), status);
        s.ips.insert(name.to_string(), Self::IP.to_string());
        s.ports.insert(name.to_string(), Self::SSH_PORT);
    }

    pub fn set_ip(&self, name: &str, ip: &str) {
        self.state
            .lock()
            .unwrap()
            .ips
            .insert(name.to_string(), ip.to_string());
    }

    /// `vm_status` reports a state string the driver does not understand.
    pub fn fail_status_with_unknown(&self, name: &str, state: &str) {
        self.state
            .lock()
            .unwrap()
            .unknown
            .insert(name.to_string(), state.to_string());
    }

    /// Make `method` fail with `message` from now on.
    pub fn fail(&self, method: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(method.to_string(), message.to_string());
    }

    pub fn add_host_only(&self, interface: NetworkInterface) {
        self.state.lock().unwrap().host_only.push(interface);
    }

    pub fn set_in_use(&self, interface: &str) {
        self.state
            .lock()
            .unwrap()
            .in_use
            .insert(interface.to_string());
    }

    /// The guest ignores ACPI shutdown requests.
    pub fn ignore_acpi(&self) {
        self.state.lock().unwrap().ignore_acpi = true;
    }

    pub fn status_of(&self, name: &str) -> VmStatus {
        self.state
            .lock()
            .unwrap()
            .vms
            .get(name)
            .copied()
            .unwrap_or(VmStatus::NotCreated)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Record the call and return the scripted failure for `method`, if any.
    fn enter(&self, method: &str, args: &[&str]) -> Result<std::sync::MutexGuard<'_, DriverState>, DevboxError> {
        let mut s = self.state.lock().unwrap();
        let mut call = method.to_string();
        for arg in args {
            call.push(' ');
            call.push_str(arg);
        }
        s.calls.push(call);
        if let Some(message) = s.failures.get(method) {
            return Err(DevboxError::ExternalCommand {
                command: format!("VBoxManage {method}"),
                message: message.clone(),
            });
        }
        Ok(s)
    }

    fn transition(&self, method: &str, name: &str, to: VmStatus) -> Result<(), DevboxError> {
        let mut s = self.enter(method, &[name])?;
        match s.vms.get_mut(name) {
            Some(status) => {
                *status = to;
                Ok(())
            }
            None => Err(DevboxError::ExternalCommand {
                command: format!("VBoxManage {method}"),
                message: format!("Could not find a registered machine named '{name}'"),
            }),
        }
    }
}

#[async_trait]
impl InterfaceUsage for FakeDriver {
    async fn is_interface_in_use(&self, name: &str) -> Result<bool, DevboxError> {
        let s = self.enter("is_interface_in_use", &[name])?;
        Ok(s.in_use.contains(name))
    }
}

#[async_trait]
impl HypervisorDriver for FakeDriver {
    async fn vm_status(&self, name: &str) -> Result<VmStatus, DevboxError> {
        let s = self.enter("vm_status", &[name])?;
        if let Some(state) = s.unknown.get(name) {
            return Err(DevboxError::UnknownState {
                state: state.clone(),
            });
        }
        Ok(s.vms.get(name).copied().unwrap_or(VmStatus::NotCreated))
    }

    async fn vms(&self) -> Result<Vec<String>, DevboxError> {
        let s = self.enter("vms", &[])?;
        Ok(s.vms.keys().cloned().collect())
    }

    async fn import_vm(&self, image: &Path, name: &str, base_folder: &Path) -> Result<(), DevboxError> {
        let image = image.display().to_string();
        let base = base_folder.display().to_string();
        let mut s = self.enter("import_vm", &[image.as_str(), name, base.as_str()])?;
        s.vms.insert(name.to_string(), VmStatus::Stopped);
        Ok(())
    }

    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), DevboxError> {
        self.enter("set_memory", &[name, memory_mb.to_string().as_str()])?;
        Ok(())
    }

    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), DevboxError> {
        self.enter("set_cpus", &[name, cpus.to_string().as_str()])?;
        Ok(())
    }

    async fn start_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.transition("start_vm", name, VmStatus::Running)
    }

    async fn stop_vm(&self, name: &str) -> Result<(), DevboxError> {
        let ignore = self.state.lock().unwrap().ignore_acpi;
        if ignore {
            self.enter("stop_vm", &[name])?;
            return Ok(());
        }
        self.transition("stop_vm", name, VmStatus::Stopped)
    }

    async fn power_off_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.transition("power_off_vm", name, VmStatus::Stopped)
    }

    async fn suspend_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.transition("suspend_vm", name, VmStatus::Saved)
    }

    async fn resume_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.transition("resume_vm", name, VmStatus::Running)
    }

    async fn resume_paused_vm(&self, name: &str) -> Result<(), DevboxError> {
        self.transition("resume_paused_vm", name, VmStatus::Running)
    }

    async fn destroy_vm(&self, name: &str) -> Result<(), DevboxError> {
        let mut s = self.enter("destroy_vm", &[name])?;
        s.vms.remove(name);
        s.ips.remove(name);
        s.ports.remove(name);
        Ok(())
    }

    async fn host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError> {
        let s = self.enter("host_only_interfaces", &[])?;
        Ok(s.host_only.clone())
    }

    async fn create_host_only_interface(&self, ip: &str) -> Result<String, DevboxError> {
        let mut s = self.enter("create_host_only_interface", &[ip])?;
        let name = format!("vboxnet{}", s.host_only.len());
        s.host_only.push(NetworkInterface {
            name: name.clone(),
            ip: ip.to_string(),
            hardware_address: String::new(),
            exists: true,
        });
        Ok(name)
    }

    async fn attach_interface(&self, interface: &str, vm: &str) -> Result<(), DevboxError> {
        let mut s = self.enter("attach_interface", &[interface, vm])?;
        let host_ip = s
            .host_only
            .iter()
            .find(|i| i.name == interface)
            .map(|i| i.ip.clone())
            .ok_or_else(|| DevboxError::ExternalCommand {
                command: "VBoxManage attach_interface".into(),
                message: format!("no host-only interface named '{interface}'"),
            })?;
        let guest_ip = address::ip_for_subnet(&address::subnet_for_ip(&host_ip)?)?;
        s.ips.insert(vm.to_string(), guest_ip);
        Ok(())
    }

    async fn forward_port(
        &self,
        vm: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), DevboxError> {
        let mut s = self.enter(
            "forward_port",
            &[
                vm,
                rule,
                host_port.to_string().as_str(),
                guest_port.to_string().as_str(),
            ],
        )?;
        s.ports.insert(vm.to_string(), host_port);
        Ok(())
    }

    async fn vm_ip(&self, vm: &str) -> Result<String, DevboxError> {
        let s = self.enter("vm_ip", &[vm])?;
        s.ips.get(vm).cloned().ok_or_else(|| DevboxError::Precondition {
            message: format!("VM '{vm}' has no host-only adapter"),
        })
    }

    async fn host_forward_port(&self, vm: &str, rule: &str) -> Result<u16, DevboxError> {
        let s = self.enter("host_forward_port", &[vm, rule])?;
        s.ports.get(vm).copied().ok_or_else(|| DevboxError::Precondition {
            message: format!("VM '{vm}' has no '{rule}' port forward"),
        })
    }

    async fn describe_vm(&self, name: &str) -> Result<String, DevboxError> {
        let s = self.enter("describe_vm", &[name])?;
        let status = s.vms.get(name).copied().unwrap_or(VmStatus::NotCreated);
        Ok(format!("name=\"{name}\"\nVMState=\"{status:?}\"\n"))
    }
}

// ── FakeSsh ──────────────────────────────────────────────

type Scripted = Result<String, String>;

/// Every address answers with empty output unless scripted otherwise.
#[derive(Default)]
pub struct FakeSsh {
    responses: Mutex<HashMap<String, Scripted>>,
    host_responses: Mutex<HashMap<String, Scripted>>,
    delays: Mutex<HashMap<String, Duration>>,
    unreachable: Mutex<HashSet<String>>,
    streaming_failure: Mutex<Option<String>>,
    rejected_keys: Mutex<HashSet<PathBuf>>,
    commands: Mutex<Vec<(String, String, PathBuf)>>,
    streamed: Mutex<Vec<String>>,
}

impl FakeSsh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for any command sent to `addr` (`ip:port`).
    pub fn respond(&self, addr: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .insert(addr.to_string(), response);
    }

    /// Answer for `ip` whatever the port.
    pub fn respond_any_port(&self, ip: &str, response: Scripted) {
        self.host_responses
            .lock()
            .unwrap()
            .insert(ip.to_string(), response);
    }

    pub fn delay(&self, addr: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(addr.to_string(), delay);
    }

    /// Refuse connections to `addr`.
    pub fn unreachable(&self, addr: &str) {
        self.unreachable.lock().unwrap().insert(addr.to_string());
    }

    /// Authentication with `key` fails until a key install succeeds.
    pub fn reject_key(&self, key: impl Into<PathBuf>) {
        self.rejected_keys.lock().unwrap().insert(key.into());
    }

    pub fn rejects(&self, key: &Path) -> bool {
        self.rejected_keys.lock().unwrap().contains(key)
    }

    fn check_key(&self, addr: &SshAddress, key: &Path) -> Result<(), DevboxError> {
        if self.rejects(key) {
            return Err(DevboxError::Transport {
                context: format!("ssh {addr}"),
                message: "Permission denied (publickey)".into(),
            });
        }
        Ok(())
    }

    pub fn fail_streaming(&self, message: &str) {
        *self.streaming_failure.lock().unwrap() = Some(message.to_string());
    }

    /// `(command, address, key)` of every `run_command`.
    pub fn commands(&self) -> Vec<(String, String, PathBuf)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn streamed(&self) -> Vec<String> {
        self.streamed.lock().unwrap().clone()
    }

    fn scripted(&self, addr: &SshAddress) -> Scripted {
        let key = addr.to_string();
        if self.unreachable.lock().unwrap().contains(&key) {
            return Err("connection refused".into());
        }
        if let Some(r) = self.responses.lock().unwrap().get(&key) {
            return r.clone();
        }
        if let Some(r) = self.host_responses.lock().unwrap().get(&addr.ip) {
            return r.clone();
        }
        Ok(String::new())
    }
}

#[async_trait]
impl SshTransport for FakeSsh {
    async fn run_command(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        timeout: Duration,
    ) -> Result<String, DevboxError> {
        self.commands.lock().unwrap().push((
            command.to_string(),
            addr.to_string(),
            key.to_path_buf(),
        ));
        let delay = self.delays.lock().unwrap().get(&addr.to_string()).copied();
        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(DevboxError::Timeout {
                    operation: format!("ssh connection to {addr}"),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
        }
        self.check_key(addr, key)?;
        let output = self.scripted(addr).map_err(|message| DevboxError::Transport {
            context: format!("ssh {addr}"),
            message,
        })?;
        if command.contains("authorized_keys") {
            self.rejected_keys.lock().unwrap().clear();
        }
        Ok(output)
    }

    async fn run_streaming(
        &self,
        command: &str,
        addr: &SshAddress,
        key: &Path,
        _timeout: Duration,
    ) -> Result<(), DevboxError> {
        self.streamed.lock().unwrap().push(command.to_string());
        self.check_key(addr, key)?;
        match self.streaming_failure.lock().unwrap().clone() {
            Some(message) => Err(DevboxError::Transport {
                context: format!("running provisioner on {addr}"),
                message,
            }),
            None => Ok(()),
        }
    }
}

// ── FakeNetwork / FakeHost / RecordingUi ────────────────

#[derive(Default)]
pub struct FakeNetwork {
    live: Mutex<Vec<NetworkInterface>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn add_live(&self, interface: NetworkInterface) {
        self.live.lock().unwrap().push(interface);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkProbe for FakeNetwork {
    async fn interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError> {
        self.calls.lock().unwrap().push("interfaces".into());
        Ok(self.live.lock().unwrap().clone())
    }
}

/// 16 GiB, all of it free, four CPUs.
pub struct FakeHost {
    total_mb: AtomicU64,
    free_mb: AtomicU64,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            total_mb: AtomicU64::new(16384),
            free_mb: AtomicU64::new(16384),
        }
    }
}

impl FakeHost {
    pub fn set_free_mb(&self, mb: u64) {
        self.free_mb.store(mb, Ordering::SeqCst);
    }
}

impl HostResources for FakeHost {
    fn total_memory_mb(&self) -> Result<u64, DevboxError> {
        Ok(self.total_mb.load(Ordering::SeqCst))
    }

    fn free_memory_mb(&self) -> Result<u64, DevboxError> {
        Ok(self.free_mb.load(Ordering::SeqCst))
    }

    fn cpus(&self) -> u32 {
        4
    }
}

/// Captures what would be printed; answers prompts from a queue (default no).
#[derive(Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    answers: Mutex<VecDeque<bool>>,
}

impl RecordingUi {
    pub fn answer(&self, yes: bool) {
        self.answers.lock().unwrap().push_back(yes);
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn confirm(&self, prompt: &str) -> Result<bool, DevboxError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }
}

// ── FakeTrust ────────────────────────────────────────────

/// Remembers the certificate instead of touching the host.
#[derive(Default)]
pub struct FakeTrust {
    stored: Mutex<Option<String>>,
    unstores: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl FakeTrust {
    pub fn stored(&self) -> Option<String> {
        self.stored.lock().unwrap().clone()
    }

    pub fn unstores(&self) -> u64 {
        self.unstores.load(Ordering::SeqCst)
    }

    /// Both `store` and `unstore` fail with `message` from now on.
    pub fn fail(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    fn check(&self, command: &str) -> Result<(), DevboxError> {
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(DevboxError::ExternalCommand {
                command: command.into(),
                message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TrustStore for FakeTrust {
    async fn store(&self, pem: &str) -> Result<(), DevboxError> {
        self.check("update-ca-certificates")?;
        *self.stored.lock().unwrap() = Some(pem.to_string());
        Ok(())
    }

    async fn unstore(&self) -> Result<(), DevboxError> {
        self.unstores.fetch_add(1, Ordering::SeqCst);
        self.check("update-ca-certificates --fresh")?;
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
}

// ── TestRig ──────────────────────────────────────────────

/// A `Machine` over fakes, rooted at a throwaway home directory.
///
/// The default image and the stock SSH key are present in the fake store.
pub struct TestRig {
    _home: TempDir,
    pub config: SystemConfig,
    pub driver: Arc<FakeDriver>,
    pub ssh: Arc<FakeSsh>,
    pub network: Arc<FakeNetwork>,
    pub fs: Arc<FakeFs>,
    pub host: Arc<FakeHost>,
    pub trust: Arc<FakeTrust>,
    pub ui: Arc<RecordingUi>,
}

impl TestRig {
    pub fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let config = SystemConfig {
            home: home.path().to_path_buf(),
            config: Config::default(),
            proxies: Proxies::default(),
        };
        let fs = Arc::new(FakeFs::new());
        fs.put(config.default_ova_path(), 1024, "");
        fs.put(config.insecure_key_path(), 64, "");
        Self {
            _home: home,
            config,
            driver: Arc::new(FakeDriver::default()),
            ssh: Arc::new(FakeSsh::new()),
            network: Arc::new(FakeNetwork::default()),
            fs,
            host: Arc::new(FakeHost::default()),
            trust: Arc::new(FakeTrust::default()),
            ui: Arc::new(RecordingUi::default()),
        }
    }

    pub fn machine(&self) -> Machine {
        Machine {
            config: Arc::new(self.config.clone()),
            driver: self.driver.clone(),
            ssh: self.ssh.clone(),
            network: self.network.clone(),
            fs: self.fs.clone(),
            host: self.host.clone(),
            trust: self.trust.clone(),
            ui: self.ui.clone(),
        }
    }

    /// Identity `FakeDriver::add_vm` gives a VM.
    pub fn identity(name: &str) -> VmIdentity {
        VmIdentity {
            name: name.to_string(),
            domain: "local.devbox.io".into(),
            ip: FakeDriver::IP.into(),
            ssh_port: FakeDriver::SSH_PORT,
        }
    }
}
