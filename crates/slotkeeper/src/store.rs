//! Snapshot store contract and filesystem implementation.
//!
//! The store only enumerates and deletes durable snapshots; the cache
//! payload bytes are written and read by the backend itself, addressed by
//! the file names the [`crate::snapshot::SnapshotKey`] encoding produces.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;

/// One durable snapshot as the store sees it.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub name: String,
    pub size: u64,
}

/// Durable snapshot enumeration and deletion.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn list(&self) -> Result<Vec<SnapshotEntry>, StoreError>;
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Store over a flat directory of `.bin` snapshot files.
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn list(&self) -> Result<Vec<SnapshotEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let metadata = item
                .metadata()
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
            entries.push(SnapshotEntry {
                name: name.to_string(),
                size: metadata.len(),
            });
        }
        Ok(entries)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        // Names come from directory listings or key encoding; anything with
        // path structure is not a snapshot name.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let path = self.dir.join(name);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::debug!(snapshot = %name, "Deleted snapshot file");
        Ok(())
    }
}
