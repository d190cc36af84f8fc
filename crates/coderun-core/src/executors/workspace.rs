//! Scratch workspaces for compile-and-run executions.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

use crate::errors::ExecutionError;

/// A uniquely named directory owned by exactly one execution attempt.
///
/// The source file, the compiled artifact and the directory itself are removed
/// when the workspace is dropped, whichever path the execution took to get
/// there. Removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
    source_path: PathBuf,
    artifact_path: PathBuf,
}

impl ScratchWorkspace {
    /// Create `<parent>/<prefix><random>` (the system temp dir when `parent` is `None`).
    pub fn create(
        prefix: &str,
        parent: Option<&Path>,
        source_name: &str,
        artifact_name: &str,
    ) -> Result<Self, ExecutionError> {
        let mut builder = Builder::new();
        builder.prefix(prefix);
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let root = dir.path().to_path_buf();
        log::debug!("Created scratch workspace {}", root.display());

        Ok(Self {
            source_path: root.join(source_name),
            artifact_path: root.join(artifact_name),
            root,
            dir: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub async fn write_source(&self, contents: &str) -> Result<(), ExecutionError> {
        tokio::fs::write(&self.source_path, contents).await?;
        Ok(())
    }

    /// Remove everything now instead of waiting for drop.
    pub fn cleanup(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        for file in [&self.source_path, &self.artifact_path] {
            if let Err(e) = fs::remove_file(file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {}", file.display(), e);
                }
            }
        }

        if let Err(e) = dir.close() {
            log::warn!(
                "Failed to remove scratch workspace {}: {}",
                self.root.display(),
                e
            );
        } else {
            log::debug!("Removed scratch workspace {}", self.root.display());
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}
