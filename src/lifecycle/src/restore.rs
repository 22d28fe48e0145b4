//! Cold Restore Workflow
//!
//! Brings cold and archive snapshots back to a restorable state:
//!
//! ```text
//! pending -> warming -> ready -> completed
//!    \          \         \
//!     +----------+---------+--> failed | expired
//! ```
//!
//! Every step is a compare-and-set on the stored status, so two callers
//! racing on the same request cannot both advance it. A request is claimed
//! for warming before the provider is asked, so only the winner of that
//! race starts a retrieval. Expiry is never
//! inferred on read; [`ColdRestoreWorkflow::expire_past_due`] persists it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::config::ColdRestoreConfig;
use common::model::{
    ColdRestoreRequest, RestorePriority, RestoreStatus, SnapshotKey, StorageTierConfig,
};
use common::store::{RestoreInsert, Store};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{RetrievalStatus, StorageBackend};
use crate::error::{CandidateError, LifecycleError, Result};
use crate::metrics::LifecycleMetrics;

/// A user or agent asking for a cold snapshot.
#[derive(Debug, Clone)]
pub struct NewRestoreRequest {
    pub org_id: Uuid,
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub requested_by: String,
    pub target_path: Option<String>,
    pub priority: RestorePriority,
}

impl NewRestoreRequest {
    pub fn new(
        org_id: Uuid,
        repository_id: Uuid,
        snapshot_id: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            org_id,
            repository_id,
            snapshot_id: snapshot_id.into(),
            requested_by: requested_by.into(),
            target_path: None,
            priority: RestorePriority::default(),
        }
    }

    pub fn with_target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn with_priority(mut self, priority: RestorePriority) -> Self {
        self.priority = priority;
        self
    }

    fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }
}

/// Result of polling the provider for warming requests.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub ready: Vec<ColdRestoreRequest>,
    pub failed: Vec<ColdRestoreRequest>,
    pub still_warming: usize,
    pub errors: Vec<CandidateError>,
}

/// How long a warming request may go without a retrieval handle before a
/// poll gives up on it.
const HANDLE_GRACE: Duration = Duration::from_secs(15 * 60);

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

pub struct ColdRestoreWorkflow {
    store: Arc<dyn Store>,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    metrics: LifecycleMetrics,
    config: ColdRestoreConfig,
}

impl ColdRestoreWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: ColdRestoreConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            store,
            backend,
            clock,
            metrics,
            config,
        }
    }

    /// Create a pending request, or return the open one for the same
    /// snapshot. The retrieval cost is fixed here from current pricing.
    pub async fn request_restore(&self, new: NewRestoreRequest) -> Result<RestoreInsert> {
        let key = new.key();
        let tier = self
            .store
            .get_snapshot_tier(&key)
            .await?
            .filter(|t| t.org_id == new.org_id)
            .ok_or_else(|| LifecycleError::not_found("snapshot", &key))?;
        if !tier.current_tier.is_cold_storage() {
            return Err(LifecycleError::NotInColdStorage {
                key,
                tier: tier.current_tier,
            });
        }

        let pricing = self.pricing_for(new.org_id, tier.current_tier).await?;
        let retrieval_cost = pricing
            .as_ref()
            .map_or(0.0, |p| tier.size_gb() * p.retrieval_cost_per_gb);

        let now = self.clock.now();
        let request = ColdRestoreRequest {
            id: Uuid::new_v4(),
            org_id: new.org_id,
            snapshot_id: new.snapshot_id,
            repository_id: new.repository_id,
            requested_by: new.requested_by,
            from_tier: tier.current_tier,
            target_path: new.target_path,
            priority: new.priority,
            status: RestoreStatus::Pending,
            retrieval_handle: None,
            estimated_ready_at: None,
            ready_at: None,
            expires_at: None,
            completed_at: None,
            retrieval_cost,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.store.insert_restore_request(&request).await?;
        match &inserted {
            RestoreInsert::Created(r) => {
                self.metrics.record_restore_requested();
                info!(
                    org_id = %r.org_id,
                    restore_id = %r.id,
                    snapshot = %key,
                    from_tier = %r.from_tier,
                    retrieval_cost = r.retrieval_cost,
                    "Cold restore requested"
                );
            }
            RestoreInsert::Existing(r) => {
                debug!(
                    restore_id = %r.id,
                    status = %r.status,
                    snapshot = %key,
                    "Returning open cold restore request"
                );
            }
        }
        Ok(inserted)
    }

    pub async fn get(&self, id: Uuid) -> Result<ColdRestoreRequest> {
        self.store
            .get_restore_request(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("restore request", id))
    }

    /// `pending -> warming`: claim the request, then hand the retrieval to
    /// the provider. A rejected retrieval fails the request.
    pub async fn begin_warming(&self, id: Uuid) -> Result<ColdRestoreRequest> {
        let request = self.get(id).await?;
        let claimed = self
            .advance(request, RestoreStatus::Warming, |_| {})
            .await?;

        let handle = match self.backend.retrieve_from_cold_storage(&claimed.key()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(restore_id = %id, error = %e, "Provider rejected retrieval");
                return self.fail(id, &e.to_string()).await;
            }
        };

        let now = self.clock.now();
        let estimated_ready_at = match handle.estimated_ready_at {
            Some(at) => at,
            None => now + self.retrieval_time(&claimed).await?,
        };
        let warming = ColdRestoreRequest {
            retrieval_handle: Some(handle.id),
            estimated_ready_at: Some(estimated_ready_at),
            updated_at: now,
            ..claimed
        };
        if !self
            .store
            .update_restore_request(&warming, RestoreStatus::Warming)
            .await?
        {
            warn!(restore_id = %id, "Request left warming before its retrieval was recorded");
            return Err(LifecycleError::invalid_transition(
                "restore request",
                RestoreStatus::Warming,
                RestoreStatus::Warming,
            ));
        }
        info!(
            restore_id = %warming.id,
            estimated_ready_at = %estimated_ready_at,
            "Cold restore warming"
        );
        Ok(warming)
    }

    /// `warming -> ready`: the data is available until the window closes.
    pub async fn mark_ready(&self, id: Uuid) -> Result<ColdRestoreRequest> {
        let request = self.get(id).await?;
        let now = self.clock.now();
        let expires_at = expires_at(now, self.config.retention_window);
        let ready = self
            .advance(request, RestoreStatus::Ready, |r| {
                r.ready_at = Some(now);
                r.expires_at = Some(expires_at);
            })
            .await?;
        self.metrics.record_restore_ready();
        info!(restore_id = %id, expires_at = %expires_at, "Cold restore ready");
        Ok(ready)
    }

    /// `ready -> completed`: the requester consumed the data.
    pub async fn complete(&self, id: Uuid) -> Result<ColdRestoreRequest> {
        let request = self.get(id).await?;
        let now = self.clock.now();
        let completed = self
            .advance(request, RestoreStatus::Completed, |r| {
                r.completed_at = Some(now);
            })
            .await?;
        info!(restore_id = %id, "Cold restore completed");
        Ok(completed)
    }

    /// Move any non-terminal request to `failed`.
    pub async fn fail(&self, id: Uuid, message: &str) -> Result<ColdRestoreRequest> {
        let request = self.get(id).await?;
        let failed = self
            .advance(request, RestoreStatus::Failed, |r| {
                r.error_message = Some(message.to_string());
            })
            .await?;
        self.metrics.record_restore_failed();
        warn!(restore_id = %id, error = message, "Cold restore failed");
        Ok(failed)
    }

    /// Start warming every pending request of `org_id`.
    pub async fn start_pending(&self, org_id: Uuid) -> Result<Vec<ColdRestoreRequest>> {
        let pending = self
            .store
            .list_restores_in_status(org_id, RestoreStatus::Pending)
            .await?;
        let mut started = Vec::with_capacity(pending.len());
        for request in pending {
            started.extend(unless_moved_on(request.id, self.begin_warming(request.id).await)?);
        }
        Ok(started)
    }

    /// Ask the provider about every warming request of `org_id`.
    pub async fn poll_warming(&self, org_id: Uuid) -> Result<PollOutcome> {
        let warming = self
            .store
            .list_restores_in_status(org_id, RestoreStatus::Warming)
            .await?;
        let mut outcome = PollOutcome::default();
        let now = self.clock.now();

        for request in warming {
            let Some(handle) = request.retrieval_handle.as_deref() else {
                if now < request.updated_at + to_chrono(HANDLE_GRACE) {
                    outcome.still_warming += 1;
                } else {
                    let failed = self
                        .fail(request.id, "warming request has no retrieval handle")
                        .await;
                    outcome.failed.extend(unless_moved_on(request.id, failed)?);
                }
                continue;
            };
            match self.backend.retrieval_status(handle).await {
                Ok(RetrievalStatus::InProgress) => outcome.still_warming += 1,
                Ok(RetrievalStatus::Ready) => {
                    let ready = self.mark_ready(request.id).await;
                    outcome.ready.extend(unless_moved_on(request.id, ready)?);
                }
                Ok(RetrievalStatus::Failed(message)) => {
                    let failed = self.fail(request.id, &message).await;
                    outcome.failed.extend(unless_moved_on(request.id, failed)?);
                }
                Err(e) => {
                    warn!(restore_id = %request.id, error = %e, "Failed to poll retrieval");
                    outcome
                        .errors
                        .push(CandidateError::new(&request.key(), e.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// `ready -> expired` for every request whose window has closed.
    pub async fn expire_past_due(&self) -> Result<u64> {
        let expired = self.store.expire_ready_restores(self.clock.now()).await?;
        if expired > 0 {
            info!(expired, "Expired cold restore requests");
            self.metrics.record_restores_expired(expired);
        }
        Ok(expired)
    }

    async fn advance(
        &self,
        mut request: ColdRestoreRequest,
        next: RestoreStatus,
        apply: impl FnOnce(&mut ColdRestoreRequest),
    ) -> Result<ColdRestoreRequest> {
        ensure_can_move(&request, next)?;
        let expected = request.status;
        request.status = next;
        request.updated_at = self.clock.now();
        apply(&mut request);

        if !self.store.update_restore_request(&request, expected).await? {
            return Err(LifecycleError::invalid_transition(
                "restore request",
                expected,
                next,
            ));
        }
        Ok(request)
    }

    async fn pricing_for(
        &self,
        org_id: Uuid,
        tier: common::model::TierType,
    ) -> Result<Option<StorageTierConfig>> {
        Ok(self
            .store
            .list_tier_configs(org_id)
            .await?
            .into_iter()
            .find(|p| p.tier_type == tier))
    }

    /// Provider estimate fallback: tier pricing first, then configuration.
    async fn retrieval_time(&self, request: &ColdRestoreRequest) -> Result<chrono::Duration> {
        let configured = self
            .pricing_for(request.org_id, request.from_tier)
            .await?
            .map(|p| p.retrieval_time)
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_retrieval_time);
        Ok(to_chrono(configured))
    }
}

/// `None` when another caller moved the request first.
fn unless_moved_on(
    id: Uuid,
    result: Result<ColdRestoreRequest>,
) -> Result<Option<ColdRestoreRequest>> {
    match result {
        Ok(request) => Ok(Some(request)),
        Err(LifecycleError::InvalidStateTransition { .. }) => {
            debug!(restore_id = %id, "Request moved on concurrently");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn ensure_can_move(request: &ColdRestoreRequest, next: RestoreStatus) -> Result<()> {
    if request.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(LifecycleError::invalid_transition(
            "restore request",
            request.status,
            next,
        ))
    }
}

/// When a ready request stops being restorable.
pub fn expires_at(ready_at: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    ready_at + to_chrono(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, RetrievalHandle};
    use crate::testing::RecordingBackend;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use common::clock::ManualClock;
    use common::model::{SnapshotTier, TierType};
    use common::store::InMemoryStore;
    use common::testing::{SnapshotFixture, tier_pricing};

    struct Harness {
        store: InMemoryStore,
        backend: RecordingBackend,
        clock: ManualClock,
        metrics: LifecycleMetrics,
        org_id: Uuid,
    }

    impl Harness {
        async fn new() -> Self {
            let h = Self {
                store: InMemoryStore::new(),
                backend: RecordingBackend::new(),
                clock: ManualClock::new(Utc::now()),
                metrics: LifecycleMetrics::new(),
                org_id: Uuid::new_v4(),
            };
            for pricing in tier_pricing(h.org_id) {
                h.store.upsert_tier_config(&pricing).await.unwrap();
            }
            h
        }

        fn workflow(&self) -> ColdRestoreWorkflow {
            self.workflow_with(Arc::new(self.backend.clone()))
        }

        fn workflow_with(&self, backend: Arc<dyn StorageBackend>) -> ColdRestoreWorkflow {
            ColdRestoreWorkflow::new(
                Arc::new(self.store.clone()),
                backend,
                Arc::new(self.clock.clone()),
                ColdRestoreConfig::default(),
                self.metrics.clone(),
            )
        }

        async fn snapshot_in(&self, id: &str, tier: TierType) -> SnapshotKey {
            let now = self.clock.now();
            let snapshot = SnapshotFixture::new(self.org_id, id, now)
                .aged(200, now)
                .sized(10 << 30)
                .build();
            self.store.upsert_snapshot(&snapshot).await.unwrap();
            let placed = SnapshotTier {
                current_tier: tier,
                tiered_at: Some(now),
                ..SnapshotTier::hot(&snapshot)
            };
            self.store.upsert_snapshot_tier(&placed).await.unwrap();
            snapshot.key()
        }

        fn new_request(&self, key: &SnapshotKey) -> NewRestoreRequest {
            NewRestoreRequest::new(
                self.org_id,
                key.repository_id,
                key.snapshot_id.clone(),
                "alice",
            )
            .with_target_path("/restore")
        }
    }

    #[tokio::test]
    async fn test_request_fixes_retrieval_cost() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;

        let request = h
            .workflow()
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();

        assert_eq!(request.status, RestoreStatus::Pending);
        assert_eq!(request.from_tier, TierType::Cold);
        assert!((request.retrieval_cost - 10.0 * 0.03).abs() < 1e-9);
        assert_eq!(request.target_path.as_deref(), Some("/restore"));
    }

    #[tokio::test]
    async fn test_duplicate_request_returns_existing() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Archive).await;
        let workflow = h.workflow();

        let first = workflow.request_restore(h.new_request(&key)).await.unwrap();
        let second = workflow.request_restore(h.new_request(&key)).await.unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.request().id, second.request().id);
        assert_eq!(h.store.list_restore_requests(h.org_id).await.unwrap().len(), 1);
        assert_eq!(h.metrics.restores_requested(), 1);
    }

    #[tokio::test]
    async fn test_hot_snapshot_is_rejected() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Warm).await;

        let err = h
            .workflow()
            .request_restore(h.new_request(&key))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotInColdStorage {
                tier: TierType::Warm,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_not_found() {
        let h = Harness::new().await;
        let key = SnapshotKey::new(Uuid::new_v4(), "missing");

        let err = h
            .workflow()
            .request_restore(h.new_request(&key))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let workflow = h.workflow();
        let start = h.clock.now();

        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();

        let warming = workflow.begin_warming(request.id).await.unwrap();
        assert_eq!(warming.status, RestoreStatus::Warming);
        // Cold pricing in the fixtures retrieves in three hours.
        assert_eq!(
            warming.estimated_ready_at,
            Some(start + ChronoDuration::hours(3))
        );

        let poll = workflow.poll_warming(h.org_id).await.unwrap();
        assert_eq!(poll.still_warming, 1);

        h.clock.advance(ChronoDuration::hours(3));
        h.backend
            .set_retrieval_status(&key, RetrievalStatus::Ready);
        let poll = workflow.poll_warming(h.org_id).await.unwrap();
        assert_eq!(poll.ready.len(), 1);
        let ready = &poll.ready[0];
        assert_eq!(ready.ready_at, Some(h.clock.now()));
        assert_eq!(
            ready.expires_at,
            Some(h.clock.now() + ChronoDuration::hours(24))
        );

        let completed = workflow.complete(request.id).await.unwrap();
        assert_eq!(completed.status, RestoreStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert!((completed.retrieval_cost - request.retrieval_cost).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_provider_eta_wins() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Archive).await;
        let eta = h.clock.now() + ChronoDuration::minutes(90);
        h.backend.set_retrieval_eta(Some(eta));
        let workflow = h.workflow();

        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();
        let warming = workflow.begin_warming(request.id).await.unwrap();
        assert_eq!(warming.estimated_ready_at, Some(eta));
    }

    #[tokio::test]
    async fn test_rejected_retrieval_fails_request() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        h.backend.fail_retrievals_for(&key);
        let workflow = h.workflow();

        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();
        let failed = workflow.begin_warming(request.id).await.unwrap();

        assert_eq!(failed.status, RestoreStatus::Failed);
        assert!(failed.error_message.is_some());

        // A terminal request no longer blocks a new one.
        let again = workflow.request_restore(h.new_request(&key)).await.unwrap();
        assert!(again.is_created());
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_are_rejected() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let workflow = h.workflow();
        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();

        let err = workflow.complete(request.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
        let err = workflow.mark_ready(request.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));

        workflow.fail(request.id, "cancelled").await.unwrap();
        let err = workflow.begin_warming(request.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_expire_only_after_window() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let workflow = h.workflow();
        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();
        workflow.begin_warming(request.id).await.unwrap();
        workflow.mark_ready(request.id).await.unwrap();

        h.clock.advance(ChronoDuration::hours(24));
        assert_eq!(workflow.expire_past_due().await.unwrap(), 0);

        h.clock.advance(ChronoDuration::seconds(1));
        assert_eq!(workflow.expire_past_due().await.unwrap(), 1);
        assert_eq!(
            workflow.get(request.id).await.unwrap().status,
            RestoreStatus::Expired
        );
        assert_eq!(workflow.expire_past_due().await.unwrap(), 0);
        assert_eq!(h.metrics.restores_expired(), 1);
    }

    #[test]
    fn test_expires_at_adds_window() {
        let ready_at = Utc::now();
        assert_eq!(
            expires_at(ready_at, Duration::from_secs(3600)),
            ready_at + ChronoDuration::hours(1)
        );
    }

    /// Yields before every provider call so concurrent callers interleave.
    /// With `cancel` set, a status poll first fails that request as a
    /// requester cancelling it would.
    #[derive(Debug, Clone)]
    struct InterleavingBackend {
        inner: RecordingBackend,
        store: InMemoryStore,
        cancel: Option<Uuid>,
    }

    #[async_trait]
    impl StorageBackend for InterleavingBackend {
        async fn move_snapshot(
            &self,
            key: &SnapshotKey,
            from_tier: TierType,
            to_tier: TierType,
        ) -> std::result::Result<(), BackendError> {
            self.inner.move_snapshot(key, from_tier, to_tier).await
        }

        async fn retrieve_from_cold_storage(
            &self,
            key: &SnapshotKey,
        ) -> std::result::Result<RetrievalHandle, BackendError> {
            tokio::task::yield_now().await;
            self.inner.retrieve_from_cold_storage(key).await
        }

        async fn retrieval_status(
            &self,
            handle: &str,
        ) -> std::result::Result<RetrievalStatus, BackendError> {
            if let Some(id) = self.cancel {
                let mut request = self.store.get_restore_request(id).await.unwrap().unwrap();
                let expected = request.status;
                request.status = RestoreStatus::Failed;
                request.error_message = Some("cancelled".to_string());
                assert!(self.store.update_restore_request(&request, expected).await.unwrap());
            }
            self.inner.retrieval_status(handle).await
        }

        async fn delete_snapshot(&self, key: &SnapshotKey) -> std::result::Result<(), BackendError> {
            self.inner.delete_snapshot(key).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_warming_starts_one_retrieval() {
        let _ = env_logger::builder().is_test(true).try_init();
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let workflow = h.workflow_with(Arc::new(InterleavingBackend {
            inner: h.backend.clone(),
            store: h.store.clone(),
            cancel: None,
        }));
        let request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();

        let (first, second) = tokio::join!(
            workflow.begin_warming(request.id),
            workflow.begin_warming(request.id)
        );

        assert_eq!(h.backend.retrievals().len(), 1);
        let (won, lost) = match (first, second) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert!(matches!(lost, LifecycleError::InvalidStateTransition { .. }));
        assert_eq!(won.status, RestoreStatus::Warming);

        let stored = workflow.get(request.id).await.unwrap();
        assert_eq!(stored.retrieval_handle, Some(RecordingBackend::handle_for(&key)));
        assert!(stored.estimated_ready_at.is_some());
    }

    #[tokio::test]
    async fn test_poll_skips_request_moved_concurrently() {
        let _ = env_logger::builder().is_test(true).try_init();
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let request = h
            .workflow()
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();
        h.workflow().begin_warming(request.id).await.unwrap();
        h.backend.set_retrieval_status(&key, RetrievalStatus::Ready);

        let workflow = h.workflow_with(Arc::new(InterleavingBackend {
            inner: h.backend.clone(),
            store: h.store.clone(),
            cancel: Some(request.id),
        }));
        let poll = workflow.poll_warming(h.org_id).await.unwrap();

        assert!(poll.ready.is_empty());
        assert!(poll.errors.is_empty());
        assert_eq!(
            workflow.get(request.id).await.unwrap().status,
            RestoreStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_handleless_request_fails_after_grace() {
        let h = Harness::new().await;
        let key = h.snapshot_in("a", TierType::Cold).await;
        let workflow = h.workflow();
        let mut request = workflow
            .request_restore(h.new_request(&key))
            .await
            .unwrap()
            .into_request();
        // Claimed for warming by a process that never recorded the handle.
        request.status = RestoreStatus::Warming;
        request.updated_at = h.clock.now();
        assert!(
            h.store
                .update_restore_request(&request, RestoreStatus::Pending)
                .await
                .unwrap()
        );

        let poll = workflow.poll_warming(h.org_id).await.unwrap();
        assert_eq!(poll.still_warming, 1);
        assert!(poll.failed.is_empty());

        h.clock.advance(ChronoDuration::minutes(15));
        let poll = workflow.poll_warming(h.org_id).await.unwrap();
        assert_eq!(poll.failed.len(), 1);
        assert!(h.backend.retrievals().is_empty());
    }
}
