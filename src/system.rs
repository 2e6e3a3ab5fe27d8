use crate::error::DevboxError;

/// Host capacity the VM is sized against.
pub trait HostResources: Send + Sync {
    fn total_memory_mb(&self) -> Result<u64, DevboxError>;
    fn free_memory_mb(&self) -> Result<u64, DevboxError>;
    fn cpus(&self) -> u32;
}

pub struct HostSystem;

impl HostResources for HostSystem {
    fn total_memory_mb(&self) -> Result<u64, DevboxError> {
        read_memory().map(|m| m.total_kb / 1024)
    }

    fn free_memory_mb(&self) -> Result<u64, DevboxError> {
        read_memory().map(|m| m.available_kb / 1024)
    }

    fn cpus(&self) -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

#[cfg(target_os = "linux")]
fn read_memory() -> Result<MemInfo, DevboxError> {
    let contents = std::fs::read_to_string("/proc/meminfo")
        .map_err(|e| DevboxError::io("reading /proc/meminfo", e))?;
    parse_meminfo(&contents).ok_or_else(|| DevboxError::Validation {
        message: "could not read memory totals from /proc/meminfo".into(),
    })
}

/// No cheap free-memory figure here; report the total for both.
#[cfg(not(target_os = "linux"))]
fn read_memory() -> Result<MemInfo, DevboxError> {
    let output = std::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .map_err(|e| DevboxError::io("running sysctl -n hw.memsize", e))?;
    let bytes: u64 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| DevboxError::ExternalCommand {
            command: "sysctl -n hw.memsize".into(),
            message: "unexpected output".into(),
        })?;
    Ok(MemInfo {
        total_kb: bytes / 1024,
        available_kb: bytes / 1024,
    })
}

/// `MemTotal` and `MemAvailable` (falling back to `MemFree`) in kB.
pub fn parse_meminfo(contents: &str) -> Option<MemInfo> {
    let field = |name: &str| {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    let total_kb = field("MemTotal")?;
    let available_kb = field("MemAvailable").or_else(|| field("MemFree"))?;
    Some(MemInfo {
        total_kb,
        available_kb,
    })
}
