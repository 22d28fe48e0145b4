//! Storage test context for integration testing
//!
//! Provides in-memory and filesystem object storage for backend scenarios.

use anyhow::{Context, Result};
use common::model::{SnapshotKey, TierType};
use futures::TryStreamExt;
use lifecycle::ObjectStoreBackend;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tempfile::TempDir;

/// Files written for every seeded snapshot.
const SNAPSHOT_FILES: [&str; 3] = ["config", "index/0", "data/pack-1"];

/// Test context for object storage operations
pub struct StorageTestContext {
    pub backend: ObjectStoreBackend,
    _temp_dir: Option<TempDir>,
}

impl StorageTestContext {
    /// Creates in-memory storage for fast tests
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self {
            backend: ObjectStoreBackend::from_url("memory://")?,
            _temp_dir: None,
        })
    }

    /// Creates filesystem storage in a temporary directory
    pub fn new_filesystem() -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let url = format!("file://{}", temp_dir.path().display());
        Ok(Self {
            backend: ObjectStoreBackend::from_url(&url)?,
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        self.backend.object_store()
    }

    /// Shared handle to the backend for engine components.
    pub fn shared_backend(&self) -> Arc<ObjectStoreBackend> {
        Arc::new(self.backend.clone())
    }

    /// Write a snapshot's files under its tier prefix.
    pub async fn seed_snapshot(&self, tier: TierType, key: &SnapshotKey) -> Result<()> {
        let prefix = ObjectStoreBackend::tier_prefix(tier, key);
        for name in SNAPSHOT_FILES {
            self.object_store()
                .put(
                    &Path::from(format!("{prefix}/{name}")),
                    PutPayload::from_static(b"snapshot data"),
                )
                .await?;
        }
        Ok(())
    }

    /// Lists all objects in storage (for verification)
    pub async fn list_all_objects(&self) -> Result<Vec<String>> {
        let objects: Vec<_> = self.object_store().list(None).try_collect().await?;
        let mut paths: Vec<String> = objects.into_iter().map(|m| m.location.to_string()).collect();
        paths.sort();
        Ok(paths)
    }

    /// Gets object count for a specific prefix
    pub async fn count_objects(&self, prefix: &Path) -> Result<usize> {
        let objects: Vec<_> = self.object_store().list(Some(prefix)).try_collect().await?;
        Ok(objects.len())
    }

    /// Number of a snapshot's objects in `tier`.
    pub async fn count_in_tier(&self, tier: TierType, key: &SnapshotKey) -> Result<usize> {
        self.count_objects(&ObjectStoreBackend::tier_prefix(tier, key))
            .await
    }

    pub async fn count_restored(&self, key: &SnapshotKey) -> Result<usize> {
        self.count_objects(&ObjectStoreBackend::restore_prefix(key))
            .await
    }

    pub fn files_per_snapshot() -> usize {
        SNAPSHOT_FILES.len()
    }
}
