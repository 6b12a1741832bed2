use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::io::AsyncWriteExt;

use super::{ObjectStore, public_url, validate_key};
use crate::error::{AppError, Result};

/// The `files` bucket as a flat directory on disk.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    /// Opens the bucket, creating its directory if needed.
    pub async fn open(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!("✅ Object store opened at {}", root.display());

        Ok(Self {
            root,
            public_base_url: public_base_url.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = self.object_path(key)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    AppError::Storage(format!("An object named {:?} already exists", key))
                }
                _ => AppError::Storage(format!("Failed to create object: {}", e)),
            })?;

        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            tracing::error!("❌ Failed to write object {}: {}", key, e);
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!("Failed to remove partial object {}: {}", key, cleanup);
            }
            return Err(AppError::Storage(format!("Failed to write object: {}", e)));
        }

        tracing::debug!("💾 Stored object {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::Storage("Object not found".to_string()))
            }
            Err(e) => Err(AppError::Storage(format!("Failed to read object: {}", e))),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to remove object: {}", e))),
        }
    }

    async fn resolve_public_url(&self, key: &str) -> Result<String> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(public_url(&self.public_base_url, key)),
            Ok(_) => Err(AppError::Storage("Object not found".to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::Storage("Object not found".to_string()))
            }
            Err(e) => Err(AppError::Storage(format!("Failed to resolve object: {}", e))),
        }
    }
}
