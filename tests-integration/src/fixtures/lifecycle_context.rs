//! Lifecycle test context: one store, one manual clock, one backend and
//! every engine component built on top of them.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::clock::ManualClock;
use common::config::Configuration;
use common::model::{
    ImmutabilityLock, LegalHold, LifecyclePolicy, PolicyStatus, RetentionRule, SnapshotKey,
    SnapshotRef, SnapshotTier, TierRule, TierType,
};
use common::store::{InMemoryStore, SqlStore, Store};
use common::testing::{SnapshotFixture, TestConfigBuilder, tier_pricing};
use lifecycle::testing::RecordingBackend;
use lifecycle::{
    AdminService, ColdRestoreWorkflow, CostAggregator, LifecycleMetrics, LifecycleService,
    PolicyEvaluator, StorageBackend, TieringEngine, TransitionWorker,
};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Where the context keeps its state.
pub enum StoreMode {
    InMemory,
    /// File-backed SQLite database in a temporary directory.
    Sqlite,
}

/// Complete test context for lifecycle scenarios
pub struct LifecycleTestContext {
    pub store: Arc<dyn Store>,
    pub clock: ManualClock,
    /// Records backend calls; also the backend unless replaced.
    pub recorder: RecordingBackend,
    pub backend: Arc<dyn StorageBackend>,
    pub metrics: LifecycleMetrics,
    pub config: Configuration,
    pub org_id: Uuid,
    /// Repository used by the snapshot helpers.
    pub repository_id: Uuid,
    _temp_dir: Option<TempDir>,
}

impl LifecycleTestContext {
    /// Fixed start instant, well away from a day boundary.
    pub fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new(StoreMode::InMemory).await
    }

    pub async fn new_sqlite() -> Result<Self> {
        Self::new(StoreMode::Sqlite).await
    }

    pub async fn new(mode: StoreMode) -> Result<Self> {
        let (store, temp_dir): (Arc<dyn Store>, Option<TempDir>) = match mode {
            StoreMode::InMemory => (Arc::new(InMemoryStore::new()), None),
            StoreMode::Sqlite => {
                let temp_dir = TempDir::new().context("Failed to create temp dir")?;
                let config = TestConfigBuilder::new()
                    .with_shared_database_dir(&temp_dir.path().to_string_lossy())
                    .build();
                let store = SqlStore::connect(&config.database)
                    .await
                    .context("Failed to open SQLite store")?;
                (Arc::new(store), Some(temp_dir))
            }
        };

        let recorder = RecordingBackend::new();
        Ok(Self {
            store,
            clock: ManualClock::new(Self::start_time()),
            backend: Arc::new(recorder.clone()),
            recorder,
            metrics: LifecycleMetrics::new(),
            config: TestConfigBuilder::new().with_dry_run(false).build(),
            org_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            _temp_dir: temp_dir,
        })
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        use common::clock::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    // Components

    pub fn evaluator(&self) -> PolicyEvaluator {
        PolicyEvaluator::new(
            self.store.clone(),
            self.backend.clone(),
            Arc::new(self.clock.clone()),
            self.config.lifecycle.clone(),
            self.metrics.clone(),
        )
    }

    pub fn tiering(&self) -> TieringEngine {
        TieringEngine::new(
            self.store.clone(),
            Arc::new(self.clock.clone()),
            self.config.tiering.clone(),
            self.metrics.clone(),
        )
    }

    pub fn worker(&self) -> TransitionWorker {
        TransitionWorker::new(
            self.store.clone(),
            self.backend.clone(),
            Arc::new(self.clock.clone()),
            self.config.transitions.clone(),
            self.config.tiering.clone(),
            self.metrics.clone(),
        )
    }

    pub fn restores(&self) -> ColdRestoreWorkflow {
        ColdRestoreWorkflow::new(
            self.store.clone(),
            self.backend.clone(),
            Arc::new(self.clock.clone()),
            self.config.cold_restore.clone(),
            self.metrics.clone(),
        )
    }

    pub fn cost(&self) -> CostAggregator {
        CostAggregator::new(
            self.store.clone(),
            Arc::new(self.clock.clone()),
            self.config.cost.clone(),
            self.metrics.clone(),
        )
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(
            self.store.clone(),
            Arc::new(self.clock.clone()),
            self.config.cost.clone(),
            self.metrics.clone(),
        )
    }

    pub fn service(&self) -> LifecycleService {
        LifecycleService::new(
            self.store.clone(),
            self.backend.clone(),
            Arc::new(self.clock.clone()),
            self.config.clone(),
        )
    }

    // Seeding

    /// Store the default price list for the context's organization.
    pub async fn add_pricing(&self) -> Result<()> {
        for pricing in tier_pricing(self.org_id) {
            self.admin().upsert_tier_pricing(&pricing).await?;
        }
        Ok(())
    }

    /// Snapshot builder in the context's organization and repository.
    pub fn fixture(&self, snapshot_id: &str, age_days: i64) -> SnapshotFixture {
        let now = self.now();
        SnapshotFixture::new(self.org_id, snapshot_id, now)
            .aged(age_days, now)
            .in_repository(self.repository_id)
    }

    pub async fn register(&self, snapshot: SnapshotRef) -> Result<SnapshotRef> {
        self.admin().register_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    /// Register a hot snapshot of `age_days` in the default repository.
    pub async fn add_snapshot(&self, snapshot_id: &str, age_days: i64) -> Result<SnapshotRef> {
        self.register(self.fixture(snapshot_id, age_days).build())
            .await
    }

    /// Register a snapshot and place it directly in `tier`.
    pub async fn add_snapshot_in(
        &self,
        snapshot_id: &str,
        age_days: i64,
        tier: TierType,
    ) -> Result<SnapshotRef> {
        let snapshot = self.add_snapshot(snapshot_id, age_days).await?;
        let placed = SnapshotTier {
            current_tier: tier,
            tiered_at: Some(self.now()),
            ..SnapshotTier::hot(&snapshot)
        };
        self.store.upsert_snapshot_tier(&placed).await?;
        Ok(snapshot)
    }

    pub fn key(&self, snapshot_id: &str) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, snapshot_id)
    }

    pub async fn tier_of(&self, snapshot_id: &str) -> Result<Option<TierType>> {
        Ok(self
            .store
            .get_snapshot_tier(&self.key(snapshot_id))
            .await?
            .map(|t| t.current_tier))
    }

    pub async fn remaining_snapshots(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .store
            .list_snapshots(self.org_id)
            .await?
            .into_iter()
            .map(|s| s.snapshot_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Lock a snapshot of the default repository for `days`.
    pub async fn lock(
        &self,
        snapshot_id: &str,
        days: i64,
        floor_tier: Option<TierType>,
    ) -> Result<ImmutabilityLock> {
        let now = self.now();
        let lock = ImmutabilityLock {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            repository_id: self.repository_id,
            snapshot_id: snapshot_id.to_string(),
            locked_at: now,
            locked_until: now + Duration::days(days),
            locked_by: "compliance".to_string(),
            reason: "regulatory retention".to_string(),
            provider_lock_enabled: false,
            provider_lock_mode: None,
            floor_tier,
        };
        Ok(self.admin().lock_snapshot(&lock).await?)
    }

    /// Place a legal hold on a snapshot of the default repository.
    pub async fn hold(&self, snapshot_id: &str) -> Result<LegalHold> {
        let hold = LegalHold {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            repository_id: self.repository_id,
            snapshot_id: snapshot_id.to_string(),
            reason: "litigation".to_string(),
            placed_by: "legal".to_string(),
            placed_at: self.now(),
        };
        self.admin().place_hold(&hold).await?;
        Ok(hold)
    }

    /// Create an active policy with the given rules.
    pub async fn active_policy(&self, rules: Vec<RetentionRule>) -> Result<LifecyclePolicy> {
        let mut policy =
            LifecyclePolicy::new(self.org_id, "integration", self.now()).with_status(PolicyStatus::Active);
        for rule in rules {
            policy = policy.with_rule(rule);
        }
        Ok(self.admin().create_policy(policy).await?)
    }

    /// Org-wide tier rule.
    pub async fn tier_rule(
        &self,
        name: &str,
        from_tier: TierType,
        to_tier: TierType,
        age_threshold_days: u32,
        min_copies: u32,
        priority: i32,
    ) -> Result<TierRule> {
        let rule = TierRule {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            repository_id: None,
            schedule_id: None,
            name: name.to_string(),
            from_tier,
            to_tier,
            age_threshold_days,
            min_copies,
            priority,
            enabled: true,
        };
        self.admin().save_tier_rule(&rule).await?;
        Ok(rule)
    }
}

/// Retention rule shorthand.
pub fn retention_rule(max_age_days: Option<u32>, keep_last: Option<u32>) -> RetentionRule {
    RetentionRule {
        name: "integration-rule".to_string(),
        max_age_days,
        keep_last,
        tag: None,
    }
}
