//! Tracing setup: terse stderr output plus a debug log under `$DEVBOX_HOME/logs`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Roll `devbox.log` over to `devbox.log.1` past this size.
const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

pub const LOG_FILE: &str = "devbox.log";

/// Install the global subscriber. The file layer discards everything until
/// the returned handle is pointed at a file.
pub fn init(verbose: bool) -> DeferredFileHandle {
    let terminal_filter = if verbose {
        EnvFilter::new("devbox=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devbox=warn"))
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(terminal_filter);

    let (file_writer, file_handle) = DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("devbox=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    file_handle
}

// ── DeferredFileWriter ───────────────────────────────────

type SharedFile = Arc<Mutex<Option<File>>>;

/// `MakeWriter` that swallows output until a file is attached.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: SharedFile,
}

#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: SharedFile,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

impl DeferredFileHandle {
    /// Start appending to `path`, rotating it first if it grew too large.
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        rotate_if_large(path, MAX_LOG_BYTES)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(file);
        }
        Ok(())
    }
}

pub struct DeferredWriter {
    inner: SharedFile,
}

impl std::io::Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.inner.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(f) => f.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.inner.lock() {
            Ok(mut slot) => slot.as_mut().map_or(Ok(()), |f| f.flush()),
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

// ── rotation ─────────────────────────────────────────────

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

/// Keep one previous generation of the log; older ones are dropped.
fn rotate_if_large(path: &Path, max_bytes: u64) -> std::io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => fs::rename(path, rotated_path(path)),
        _ => Ok(()),
    }
}
