//! Test doubles for the storage backend seam.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::model::{SnapshotKey, TierType};

use crate::backend::{BackendError, RetrievalHandle, RetrievalStatus, StorageBackend};

#[derive(Debug, Default)]
struct Recorded {
    moves: Vec<(SnapshotKey, TierType, TierType)>,
    deletes: Vec<SnapshotKey>,
    retrievals: Vec<SnapshotKey>,
    failing_moves: HashSet<SnapshotKey>,
    failing_deletes: HashSet<SnapshotKey>,
    failing_retrievals: HashSet<SnapshotKey>,
    retrieval_states: HashMap<String, RetrievalStatus>,
    retrieval_eta: Option<DateTime<Utc>>,
}

/// Backend that records every call and fails on demand.
///
/// Retrievals stay [`RetrievalStatus::InProgress`] until a test says
/// otherwise with [`RecordingBackend::set_retrieval_status`].
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle_for(key: &SnapshotKey) -> String {
        format!("retrieval-{key}")
    }

    pub fn fail_moves_for(&self, key: &SnapshotKey) {
        self.recorded().failing_moves.insert(key.clone());
    }

    pub fn fail_deletes_for(&self, key: &SnapshotKey) {
        self.recorded().failing_deletes.insert(key.clone());
    }

    pub fn fail_retrievals_for(&self, key: &SnapshotKey) {
        self.recorded().failing_retrievals.insert(key.clone());
    }

    /// Provider estimate returned with every accepted retrieval.
    pub fn set_retrieval_eta(&self, eta: Option<DateTime<Utc>>) {
        self.recorded().retrieval_eta = eta;
    }

    pub fn set_retrieval_status(&self, key: &SnapshotKey, status: RetrievalStatus) {
        self.recorded()
            .retrieval_states
            .insert(Self::handle_for(key), status);
    }

    pub fn moves(&self) -> Vec<(SnapshotKey, TierType, TierType)> {
        self.recorded().moves.clone()
    }

    pub fn deletes(&self) -> Vec<SnapshotKey> {
        self.recorded().deletes.clone()
    }

    pub fn retrievals(&self) -> Vec<SnapshotKey> {
        self.recorded().retrievals.clone()
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn move_snapshot(
        &self,
        key: &SnapshotKey,
        from_tier: TierType,
        to_tier: TierType,
    ) -> Result<(), BackendError> {
        let mut recorded = self.recorded();
        if recorded.failing_moves.contains(key) {
            return Err(BackendError::Provider(format!("move of {key} rejected")));
        }
        recorded.moves.push((key.clone(), from_tier, to_tier));
        Ok(())
    }

    async fn retrieve_from_cold_storage(
        &self,
        key: &SnapshotKey,
    ) -> Result<RetrievalHandle, BackendError> {
        let mut recorded = self.recorded();
        if recorded.failing_retrievals.contains(key) {
            return Err(BackendError::Provider(format!(
                "retrieval of {key} rejected"
            )));
        }
        recorded.retrievals.push(key.clone());
        let id = Self::handle_for(key);
        recorded
            .retrieval_states
            .entry(id.clone())
            .or_insert(RetrievalStatus::InProgress);
        Ok(RetrievalHandle {
            id,
            estimated_ready_at: recorded.retrieval_eta,
        })
    }

    async fn retrieval_status(&self, handle: &str) -> Result<RetrievalStatus, BackendError> {
        self.recorded()
            .retrieval_states
            .get(handle)
            .cloned()
            .ok_or_else(|| BackendError::Provider(format!("unknown retrieval {handle}")))
    }

    async fn delete_snapshot(&self, key: &SnapshotKey) -> Result<(), BackendError> {
        let mut recorded = self.recorded();
        if recorded.failing_deletes.contains(key) {
            return Err(BackendError::Provider(format!("delete of {key} rejected")));
        }
        recorded.deletes.push(key.clone());
        Ok(())
    }
}
