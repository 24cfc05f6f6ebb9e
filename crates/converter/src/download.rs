use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::artifact::{Artifact, ArtifactHandle};
use crate::source::base_name_of;

/// Receives finished artifacts, e.g. a browser download or a directory on disk.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn deliver(&self, handle: &ArtifactHandle, artifact: &Artifact, suggested_name: &str) -> Result<()>;
}

/// Writes artifacts into a directory. Existing files are never overwritten;
/// clashing names get a ` (n)` suffix before the extension.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn free_path(&self, name: &str) -> PathBuf {
        let candidate = self.dir.join(name);
        if tokio::fs::metadata(&candidate).await.is_err() {
            return candidate;
        }

        let base = base_name_of(name);
        let ext = &name[base.len()..];
        let mut n = 1;
        loop {
            let candidate = self.dir.join(format!("{} ({}){}", base, n, ext));
            if tokio::fs::metadata(&candidate).await.is_err() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Keep only the final path component of a suggested name
fn plain_file_name(suggested: &str) -> &str {
    suggested
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("download")
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn deliver(&self, handle: &ArtifactHandle, artifact: &Artifact, suggested_name: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", self.dir.display()))?;

        let path = self.free_path(plain_file_name(suggested_name)).await;
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("💾 Saved {} ({} bytes, {}) from {}", path.display(), artifact.len(), artifact.mime, handle);
        Ok(())
    }
}
