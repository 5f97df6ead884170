//! Changed-file upload after a run

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// Receives the files a run created or replaced
#[async_trait]
pub trait ChangedFileUploader: Send + Sync {
    /// Upload `files`, returning how many were sent
    async fn upload(&self, files: &[PathBuf]) -> RunnerResult<usize>;
}

/// Copies changed files into a destination directory, keeping file names
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    destination: PathBuf,
}

impl DirectoryUploader {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl ChangedFileUploader for DirectoryUploader {
    async fn upload(&self, files: &[PathBuf]) -> RunnerResult<usize> {
        tokio::fs::create_dir_all(&self.destination).await?;

        let mut copied = 0;
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| RunnerError::Upload(format!("{} has no file name", file.display())))?;
            let target = self.destination.join(name);
            if file.is_dir() {
                // Recordings without ffmpeg leave a directory of frames
                copy_dir(file, &target).await?;
            } else {
                tokio::fs::copy(file, &target).await?;
            }
            debug!("Uploaded {} -> {}", file.display(), target.display());
            copied += 1;
        }
        Ok(copied)
    }
}

async fn copy_dir(source: &Path, target: &Path) -> RunnerResult<()> {
    tokio::fs::create_dir_all(target).await?;
    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), target.join(entry.file_name())).await?;
        }
    }
    Ok(())
}
