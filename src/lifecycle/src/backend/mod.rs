//! Seam to the storage provider that physically holds snapshot data.
//!
//! The engine decides what should happen to a snapshot; implementations of
//! [`StorageBackend`] carry it out.

mod objects;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::model::{SnapshotKey, TierType};
use std::fmt::Debug;
use thiserror::Error;

pub use objects::{ObjectStoreBackend, object_store_from_url};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid storage URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Snapshot {key} has no data in the {tier} tier")]
    NoData { key: SnapshotKey, tier: TierType },

    #[error("Snapshot {0} has no data in cold storage")]
    NotInColdStorage(SnapshotKey),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// Provider acknowledgement of a cold retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalHandle {
    /// Opaque provider reference used to poll the retrieval.
    pub id: String,
    /// Provider's own estimate, when it gives one.
    pub estimated_ready_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    InProgress,
    Ready,
    Failed(String),
}

#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Relocate a snapshot's data between tiers.
    async fn move_snapshot(
        &self,
        key: &SnapshotKey,
        from_tier: TierType,
        to_tier: TierType,
    ) -> Result<(), BackendError>;

    /// Start bringing a cold or archived snapshot back to a restorable copy.
    async fn retrieve_from_cold_storage(
        &self,
        key: &SnapshotKey,
    ) -> Result<RetrievalHandle, BackendError>;

    async fn retrieval_status(&self, handle: &str) -> Result<RetrievalStatus, BackendError>;

    async fn delete_snapshot(&self, key: &SnapshotKey) -> Result<(), BackendError>;
}
