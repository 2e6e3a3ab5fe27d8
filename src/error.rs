use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DevboxError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to execute '{command}': {message}")]
    ExternalCommand { command: String, message: String },

    // ── addressing ───────────────────────────────────────

    #[error("all allowed network interfaces are currently taken")]
    #[diagnostic(help(
        "free one of the host-only networks 192.168.11.0 - 192.168.99.0 or pin one with --ip"
    ))]
    AllSubnetsTaken,

    #[error("{address} is not one of the allowed devbox addresses")]
    InvalidAddress { address: String },

    // ── downloads ────────────────────────────────────────

    #[error("download failed: checksum of {path} did not match")]
    #[diagnostic(help("run `devbox download` again; the partial file has been discarded"))]
    DownloadIntegrity { path: String },

    #[error("{message}")]
    ImageAuth { message: String },

    #[error("{context}: {message}")]
    Transport { context: String, message: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("could not generate SSH key: {message}")]
    SshKey { message: String },

    // ── VM lifecycle ─────────────────────────────────────

    #[error("{message}")]
    Precondition { message: String },

    #[error("failed to handle VM state '{state}'")]
    UnknownState { state: String },

    #[error("VM is in an invalid state: {reason}")]
    #[diagnostic(help("run `devbox destroy` and start again"))]
    InvalidVm { reason: String },

    #[error("failed to start VM: {0}")]
    StartVm(Box<DevboxError>),

    #[error("failed to provision VM: {0}")]
    ProvisionVm(Box<DevboxError>),

    #[error("failed to stop VM: {0}")]
    StopVm(Box<DevboxError>),

    #[error("failed to suspend VM: {0}")]
    SuspendVm(Box<DevboxError>),

    #[error("failed to resume VM: {0}")]
    ResumeVm(Box<DevboxError>),

    #[error("failed to trust the VM certificate: {0}")]
    TrustCert(Box<DevboxError>),

    #[error("failed to destroy VM '{name}': {reason}")]
    DestroyVm {
        name: String,
        reason: Box<DevboxError>,
    },

    #[error("cancelled")]
    PromptCancelled,

    #[error("failed to encode {what}: {message}")]
    Encode { what: String, message: String },
}

impl DevboxError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DevboxError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn start(self) -> Self {
        DevboxError::StartVm(Box::new(self))
    }

    pub fn provision(self) -> Self {
        DevboxError::ProvisionVm(Box::new(self))
    }
}
