use std::sync::Arc;

use async_trait::async_trait;
use common::model::{SnapshotKey, TierType};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use tracing::debug;
use url::Url;

use super::{BackendError, RetrievalHandle, RetrievalStatus, StorageBackend};

const RESTORE_PREFIX: &str = "restore";

/// [`StorageBackend`] over any `object_store` implementation.
///
/// Snapshot data lives under `<tier>/<repository>/<snapshot>/`. Cold
/// retrieval copies the data to `restore/<repository>/<snapshot>/` and is
/// complete as soon as the copy is.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn from_url(url: &str) -> Result<Self, BackendError> {
        Ok(Self::new(object_store_from_url(url)?))
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn tier_prefix(tier: TierType, key: &SnapshotKey) -> Path {
        Path::from(format!(
            "{}/{}/{}",
            tier.as_str(),
            key.repository_id,
            key.snapshot_id
        ))
    }

    pub fn restore_prefix(key: &SnapshotKey) -> Path {
        Path::from(format!(
            "{RESTORE_PREFIX}/{}/{}",
            key.repository_id, key.snapshot_id
        ))
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<ObjectMeta>, BackendError> {
        Ok(self.store.list(Some(prefix)).try_collect().await?)
    }

    /// Destination of `location` when the `from` prefix is swapped for `to`.
    fn rebase(location: &Path, from: &Path, to: &Path) -> Option<Path> {
        let relative = location.as_ref().strip_prefix(from.as_ref())?;
        Path::parse(format!("{}{relative}", to.as_ref())).ok()
    }

    async fn delete_prefix(&self, prefix: &Path) -> Result<usize, BackendError> {
        let objects = self.list(prefix).await?;
        for object in &objects {
            self.store.delete(&object.location).await?;
        }
        Ok(objects.len())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn move_snapshot(
        &self,
        key: &SnapshotKey,
        from_tier: TierType,
        to_tier: TierType,
    ) -> Result<(), BackendError> {
        let from = Self::tier_prefix(from_tier, key);
        let to = Self::tier_prefix(to_tier, key);
        let objects = self.list(&from).await?;
        if objects.is_empty() {
            return Err(BackendError::NoData {
                key: key.clone(),
                tier: from_tier,
            });
        }

        for object in &objects {
            if let Some(target) = Self::rebase(&object.location, &from, &to) {
                self.store.rename(&object.location, &target).await?;
            }
        }
        debug!(
            snapshot = %key,
            from_tier = %from_tier,
            to_tier = %to_tier,
            objects = objects.len(),
            "Moved snapshot data"
        );
        Ok(())
    }

    async fn retrieve_from_cold_storage(
        &self,
        key: &SnapshotKey,
    ) -> Result<RetrievalHandle, BackendError> {
        let restore = Self::restore_prefix(key);
        for tier in [TierType::Cold, TierType::Archive] {
            let from = Self::tier_prefix(tier, key);
            let objects = self.list(&from).await?;
            if objects.is_empty() {
                continue;
            }
            for object in &objects {
                if let Some(target) = Self::rebase(&object.location, &from, &restore) {
                    self.store.copy(&object.location, &target).await?;
                }
            }
            debug!(snapshot = %key, tier = %tier, objects = objects.len(), "Retrieved snapshot data");
            return Ok(RetrievalHandle {
                id: restore.to_string(),
                estimated_ready_at: None,
            });
        }
        Err(BackendError::NotInColdStorage(key.clone()))
    }

    async fn retrieval_status(&self, handle: &str) -> Result<RetrievalStatus, BackendError> {
        let objects = self.list(&Path::from(handle)).await?;
        if objects.is_empty() {
            Ok(RetrievalStatus::Failed(format!(
                "no retrieved data under {handle}"
            )))
        } else {
            Ok(RetrievalStatus::Ready)
        }
    }

    async fn delete_snapshot(&self, key: &SnapshotKey) -> Result<(), BackendError> {
        let mut deleted = 0;
        for tier in TierType::ALL {
            deleted += self.delete_prefix(&Self::tier_prefix(tier, key)).await?;
        }
        deleted += self.delete_prefix(&Self::restore_prefix(key)).await?;
        debug!(snapshot = %key, objects = deleted, "Deleted snapshot data");
        Ok(())
    }
}

fn invalid_url(url: &str, message: impl ToString) -> BackendError {
    BackendError::InvalidUrl {
        url: url.to_string(),
        message: message.to_string(),
    }
}

/// Create an object store from a storage URL.
///
/// Supported: `memory://`, `file:///path` (`file:///.data` is relative to the
/// working directory) and `s3://[key:secret@]host[:port]/bucket`.
pub fn object_store_from_url(url: &str) -> Result<Arc<dyn ObjectStore>, BackendError> {
    let parsed = Url::parse(url).map_err(|e| invalid_url(url, e))?;

    match parsed.scheme() {
        "file" => {
            let path = parsed.path();
            if path.is_empty() || path == "/" {
                return Err(invalid_url(url, "file URL must specify a path"));
            }
            // /.data/snapshots -> .data/snapshots, /tmp/data stays absolute
            let path = path.strip_prefix('/').filter(|p| p.starts_with('.')).unwrap_or(path);
            std::fs::create_dir_all(path).map_err(|e| invalid_url(url, e))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => Ok(Arc::new(s3_builder_from_url(&parsed)?.build()?)),
        scheme => Err(invalid_url(
            url,
            format!("unsupported scheme {scheme}, supported: file, memory, s3"),
        )),
    }
}

/// S3 or S3-compatible (MinIO) store; credentials fall back to the standard
/// AWS environment variables.
fn s3_builder_from_url(url: &Url) -> Result<AmazonS3Builder, BackendError> {
    let host = url
        .host_str()
        .ok_or_else(|| invalid_url(url.as_str(), "missing S3 host"))?;
    let port = url.port();
    let bucket = url.path().trim_start_matches('/');
    if bucket.is_empty() {
        return Err(invalid_url(url.as_str(), "S3 URL must specify a bucket"));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = url.username();
    if access_key.is_empty() {
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(key);
        }
        if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(secret);
        }
        if let Ok(region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(region);
        }
    } else {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(url.password().unwrap_or_default());
    }

    if !host.contains("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    Ok(builder)
}
