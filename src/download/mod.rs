//! Resumable, checksum-verified image downloads.
//!
//! A download only ever touches two files: the target and `<target>.partial`.
//! Bytes are appended to the partial file; it is renamed onto the target
//! once its MD5 matches. A mismatch earns exactly one fresh retry.

pub mod http;
pub mod local_fs;

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::DevboxError;
use crate::paths;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DevboxError>> + Send>>;

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool, DevboxError>;
    /// Lower-case hex MD5 of the file contents.
    async fn md5(&self, path: &Path) -> Result<String, DevboxError>;
    async fn length(&self, path: &Path) -> Result<u64, DevboxError>;
    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DevboxError>;
    async fn remove_file(&self, path: &Path) -> Result<(), DevboxError>;
    async fn create_dir(&self, path: &Path) -> Result<(), DevboxError>;
    /// Recursive; a missing directory is not an error.
    async fn remove_dir(&self, path: &Path) -> Result<(), DevboxError>;
    /// Remove every entry of `dir` whose file name is not in `keep`.
    async fn delete_all_except(&self, dir: &Path, keep: &[String]) -> Result<(), DevboxError>;
    /// Drain `data` into `path`, appending when `append` is set.
    async fn write(&self, path: &Path, data: ByteStream, append: bool) -> Result<(), DevboxError>;
}

/// A response body and where in the image it begins.
pub struct Fetched {
    /// Equal to the requested offset, or 0 when the source restarted from
    /// the beginning.
    pub start: u64,
    pub body: ByteStream,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Image bytes starting at `offset`. An offset at or past the end of the
    /// image yields an empty body.
    async fn fetch(&self, offset: u64) -> Result<Fetched, DevboxError>;
}

/// One download request. Built per call, discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    pub target_path: PathBuf,
    pub partial_path: PathBuf,
    pub expected_md5: String,
}

impl DownloadState {
    pub fn new(target_path: impl Into<PathBuf>, expected_md5: impl Into<String>) -> Self {
        let target_path = target_path.into();
        Self {
            partial_path: paths::partial_path(&target_path),
            target_path,
            expected_md5: expected_md5.into().to_ascii_lowercase(),
        }
    }

    fn dir(&self) -> &Path {
        self.target_path.parent().unwrap_or(Path::new("."))
    }

    fn file_names(&self) -> Vec<String> {
        [&self.target_path, &self.partial_path]
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

pub struct Downloader {
    fs: Arc<dyn FileStore>,
    source: Arc<dyn ImageSource>,
}

impl Downloader {
    pub fn new(fs: Arc<dyn FileStore>, source: Arc<dyn ImageSource>) -> Self {
        Self { fs, source }
    }

    /// The target exists and hashes to the expected checksum.
    pub async fn is_current(&self, state: &DownloadState) -> Result<bool, DevboxError> {
        if !self.fs.exists(&state.target_path).await? {
            return Ok(false);
        }
        Ok(self.fs.md5(&state.target_path).await? == state.expected_md5)
    }

    pub async fn download(&self, state: &DownloadState) -> Result<(), DevboxError> {
        self.fs.create_dir(state.dir()).await?;
        self.fs
            .delete_all_except(state.dir(), &state.file_names())
            .await?;

        let offset = if self.fs.exists(&state.partial_path).await? {
            self.fs.length(&state.partial_path).await?
        } else {
            0
        };
        if offset > 0 {
            tracing::info!(offset, path = %state.partial_path.display(), "resuming download");
        }

        if self.fetch_and_verify(state, offset).await? {
            return self.promote(state).await;
        }

        tracing::warn!(
            path = %state.partial_path.display(),
            "checksum mismatch, restarting download from scratch"
        );
        self.fs.remove_file(&state.partial_path).await?;
        if self.fetch_and_verify(state, 0).await? {
            return self.promote(state).await;
        }

        self.fs.remove_file(&state.partial_path).await?;
        Err(DevboxError::DownloadIntegrity {
            path: state.target_path.display().to_string(),
        })
    }

    async fn fetch_and_verify(&self, state: &DownloadState, offset: u64) -> Result<bool, DevboxError> {
        let fetched = self.source.fetch(offset).await?;
        if offset > 0 && fetched.start == 0 {
            tracing::warn!(offset, "source restarted from the beginning, truncating partial file");
        }
        self.fs
            .write(&state.partial_path, fetched.body, fetched.start > 0)
            .await?;
        Ok(self.fs.md5(&state.partial_path).await? == state.expected_md5)
    }

    async fn promote(&self, state: &DownloadState) -> Result<(), DevboxError> {
        self.fs
            .move_file(&state.partial_path, &state.target_path)
            .await?;
        tracing::info!(path = %state.target_path.display(), "image downloaded");
        Ok(())
    }
}
