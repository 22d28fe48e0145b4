//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, DatabaseConfig, StorageConfig};
use crate::model::TierType;

/// Builder for creating test configurations.
///
/// Provides a fluent API for creating configurations suitable for testing,
/// with sensible defaults that can be customized as needed.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// // Fully in-memory configuration that really deletes
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_dry_run(false)
///     .build();
///
/// // File-backed SQLite shared by several stores
/// let config = TestConfigBuilder::new()
///     .with_shared_database_dir("/tmp/snapkeeper-test")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Create a new test configuration builder.
    ///
    /// Unlike [`Configuration::default`], the scheduler is disabled and
    /// object storage is `memory://`, so nothing touches the filesystem.
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.scheduler.enabled = false;
        config.storage = StorageConfig {
            url: "memory://".to_string(),
        };
        Self { config }
    }

    /// Configure for fully in-memory operation (fastest for tests).
    ///
    /// This sets:
    /// - Storage URL to `memory://`
    /// - Database DSN to `sqlite::memory:`
    pub fn in_memory(mut self) -> Self {
        self.config.storage = StorageConfig {
            url: "memory://".to_string(),
        };
        self.config.database = DatabaseConfig::in_memory();
        self
    }

    /// Set the storage URL.
    pub fn with_storage_url(mut self, url: &str) -> Self {
        self.config.storage.url = url.to_string();
        self
    }

    /// Set the database DSN.
    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database.dsn = dsn.to_string();
        self
    }

    /// Configure a file-backed SQLite database in `dir`.
    ///
    /// In-memory SQLite (`sqlite::memory:`) is private to one connection, so
    /// tests that open several stores against the same data need a file.
    pub fn with_shared_database_dir(mut self, dir: &str) -> Self {
        self.config.database = DatabaseConfig {
            dsn: format!("sqlite://{dir}/snapkeeper.db"),
            max_connections: 2,
        };
        self
    }

    /// Toggle lifecycle dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.config.lifecycle.dry_run = dry_run;
        self
    }

    /// Disable the tiering rule engine.
    pub fn without_tiering(mut self) -> Self {
        self.config.tiering.enabled = false;
        self
    }

    /// Floor applied to locks without an explicit one.
    pub fn with_default_lock_floor(mut self, floor: TierType) -> Self {
        self.config.tiering.default_lock_floor = floor;
        self
    }

    /// Set transition batch size and worker concurrency.
    pub fn with_transition_workers(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.config.transitions.batch_size = batch_size;
        self.config.transitions.concurrency = concurrency;
        self
    }

    /// Set how long a transition may stay claimed before it is failed.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.config.transitions.claim_timeout = timeout;
        self
    }

    /// Set the per-organization evaluation budget.
    pub fn with_evaluation_budget(mut self, budget: Duration) -> Self {
        self.config.scheduler.evaluation_budget = budget;
        self
    }

    /// Set how long a ready cold restore stays available.
    pub fn with_restore_window(mut self, window: Duration) -> Self {
        self.config.cold_restore.retention_window = window;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
