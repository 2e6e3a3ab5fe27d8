use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ByteStream, FileStore};
use crate::error::DevboxError;

/// `FileStore` over the real filesystem.
pub struct LocalFs;

#[async_trait]
impl FileStore for LocalFs {
    async fn exists(&self, path: &Path) -> Result<bool, DevboxError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| DevboxError::io(format!("checking {}", path.display()), e))
    }

    async fn md5(&self, path: &Path) -> Result<String, DevboxError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| DevboxError::io(format!("opening {}", path.display()), e))?;
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; 1 << 16];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| DevboxError::io(format!("reading {}", path.display()), e))?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(format!("{:x}", ctx.compute()))
    }

    async fn length(&self, path: &Path) -> Result<u64, DevboxError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| DevboxError::io(format!("reading metadata for {}", path.display()), e))?;
        Ok(meta.len())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DevboxError> {
        tokio::fs::rename(from, to).await.map_err(|e| {
            DevboxError::io(format!("renaming {} to {}", from.display(), to.display()), e)
        })
    }

    async fn remove_file(&self, path: &Path) -> Result<(), DevboxError> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(DevboxError::io(format!("removing {}", path.display()), e))
            }
            _ => Ok(()),
        }
    }

    async fn create_dir(&self, path: &Path) -> Result<(), DevboxError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| DevboxError::io(format!("creating {}", path.display()), e))
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), DevboxError> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(DevboxError::io(format!("removing {}", path.display()), e))
            }
            _ => Ok(()),
        }
    }

    async fn delete_all_except(&self, dir: &Path, keep: &[String]) -> Result<(), DevboxError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| DevboxError::io(format!("reading {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DevboxError::io(format!("reading {}", dir.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) {
                continue;
            }
            let path = entry.path();
            tracing::debug!(path = %path.display(), "removing stale file");
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            let result = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| DevboxError::io(format!("removing {}", path.display()), e))?;
        }
        Ok(())
    }

    async fn write(&self, path: &Path, mut data: ByteStream, append: bool) -> Result<(), DevboxError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(path)
            .await
            .map_err(|e| DevboxError::io(format!("opening {}", path.display()), e))?;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DevboxError::io(format!("writing {}", path.display()), e))?;
        }

        file.flush()
            .await
            .map_err(|e| DevboxError::io(format!("flushing {}", path.display()), e))
    }
}
