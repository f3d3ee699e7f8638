//! Model artifact storage
//!
//! Trained models are opaque blobs addressed by a relative path such as
//! `saved_models/model.json`.

use async_trait::async_trait;
use featuresync_core::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Blob store for model artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write a blob, replacing any previous one at `path`
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read a blob; a missing path is [`Error::NotFound`]
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Name of this store type (for logging)
    fn store_type(&self) -> &'static str;
}

/// Artifact store on the local filesystem
///
/// Paths are relative to a root directory and may not escape it.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(&root).map_err(|e| {
            Error::StorageError(anyhow::anyhow!(
                "Failed to create artifact directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(Error::invalid_input(format!(
                "artifact path '{}' must be relative and stay under the artifact root",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.resolve_path(path)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::StorageError(anyhow::anyhow!(
                    "Failed to create directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // Write then rename so readers never see a half-written artifact
        let staging = target.with_extension("partial");
        fs::write(&staging, &bytes).await.map_err(|e| {
            Error::StorageError(anyhow::anyhow!(
                "Failed to write artifact '{}': {}",
                staging.display(),
                e
            ))
        })?;
        fs::rename(&staging, &target).await.map_err(|e| {
            Error::StorageError(anyhow::anyhow!(
                "Failed to move artifact into '{}': {}",
                target.display(),
                e
            ))
        })?;

        tracing::info!(path = %target.display(), bytes = bytes.len(), "Artifact saved");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve_path(path)?;

        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("artifact not found: {}", path)))
            }
            Err(e) => Err(Error::StorageError(anyhow::anyhow!(
                "Failed to read artifact '{}': {}",
                target.display(),
                e
            ))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve_path(path)?;
        Ok(fs::try_exists(&target).await.unwrap_or(false))
    }

    fn store_type(&self) -> &'static str {
        "local"
    }
}
