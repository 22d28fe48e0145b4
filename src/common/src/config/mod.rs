use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

use crate::model::TierType;

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

const CONFIG_FILE: &str = "snapkeeper.toml";
const ENV_PREFIX: &str = "SNAPKEEPER__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL or SQLite DSN
    pub dsn: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/snapkeeper.db"),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, used for single-shot runs and tests
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            max_connections: 1,
        }
    }
}

/// Object storage holding snapshot data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `memory://`, `file:///path` or `s3://[key:secret@]host[:port]/bucket`
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: String::from("file:///.data/snapshots"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often every organization is evaluated
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Deadline for a single organization's evaluation pass
    #[serde(with = "humantime_serde")]
    pub evaluation_budget: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(3600),
            evaluation_budget: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Log deletion decisions without deleting anything
    pub dry_run: bool,
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            lease_ttl: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TieringConfig {
    pub enabled: bool,
    /// Floor applied to immutability locks that do not name one
    pub default_lock_floor: TierType,
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_lock_floor: TierType::Hot,
            lease_ttl: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Pending transitions picked up per drain
    pub batch_size: usize,
    /// Transitions executed in parallel
    pub concurrency: usize,
    /// An in-progress transition claimed longer ago than this is failed by
    /// the next drain
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Duration,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            claim_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColdRestoreConfig {
    /// How long a retrieved copy stays available after it becomes ready
    #[serde(with = "humantime_serde")]
    pub retention_window: Duration,
    /// Fallback retrieval estimate when no tier pricing is configured
    #[serde(with = "humantime_serde")]
    pub default_retrieval_time: Duration,
}

impl Default for ColdRestoreConfig {
    fn default() -> Self {
        Self {
            retention_window: Duration::from_secs(24 * 3600),
            default_retrieval_time: Duration::from_secs(4 * 3600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CostConfig {
    /// Hot snapshots older than this count towards potential savings
    pub savings_age_threshold_days: u32,
    /// Share of that data assumed to be movable
    pub savings_fraction: f64,
    pub savings_target_tier: TierType,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            savings_age_threshold_days: 30,
            savings_fraction: 0.5,
            savings_target_tier: TierType::Warm,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub lifecycle: LifecycleConfig,
    pub tiering: TieringConfig,
    pub transitions: TransitionConfig,
    pub cold_restore: ColdRestoreConfig,
    pub cost: CostConfig,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("cost.savings_fraction must be within [0, 1], got {0}")]
    FractionOutOfRange(f64),

    #[error("cost.savings_target_tier must be colder than hot")]
    SavingsTargetNotColder,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.dsn.trim().is_empty() {
            return Err(ConfigError::Empty("database.dsn"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Zero("database.max_connections"));
        }
        if self.storage.url.trim().is_empty() {
            return Err(ConfigError::Empty("storage.url"));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(ConfigError::Zero("scheduler.tick_interval"));
        }
        if self.scheduler.evaluation_budget.is_zero() {
            return Err(ConfigError::Zero("scheduler.evaluation_budget"));
        }
        if self.lifecycle.lease_ttl.is_zero() {
            return Err(ConfigError::Zero("lifecycle.lease_ttl"));
        }
        if self.tiering.lease_ttl.is_zero() {
            return Err(ConfigError::Zero("tiering.lease_ttl"));
        }
        if self.transitions.batch_size == 0 {
            return Err(ConfigError::Zero("transitions.batch_size"));
        }
        if self.transitions.concurrency == 0 {
            return Err(ConfigError::Zero("transitions.concurrency"));
        }
        if self.transitions.claim_timeout.is_zero() {
            return Err(ConfigError::Zero("transitions.claim_timeout"));
        }
        if self.cold_restore.retention_window.is_zero() {
            return Err(ConfigError::Zero("cold_restore.retention_window"));
        }
        if self.cold_restore.default_retrieval_time.is_zero() {
            return Err(ConfigError::Zero("cold_restore.default_retrieval_time"));
        }
        let fraction = self.cost.savings_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::FractionOutOfRange(fraction));
        }
        if !self.cost.savings_target_tier.is_colder_than(TierType::Hot) {
            return Err(ConfigError::SavingsTargetNotColder);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.database.dsn, "sqlite://.data/snapkeeper.db");
        assert!(config.lifecycle.dry_run);
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(3600));
        assert_eq!(config.tiering.default_lock_floor, TierType::Hot);
        assert_eq!(config.transitions.batch_size, 100);
        assert_eq!(
            config.cold_restore.retention_window,
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(config.cost.savings_target_tier, TierType::Warm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        let config = Configuration::figment()
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.database.dsn, "sqlite://.data/snapkeeper.db");
        assert_eq!(config.cost.savings_fraction, 0.5);
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("SNAPKEEPER__DATABASE__DSN", "sqlite://./test.db");
            jail.set_env("SNAPKEEPER__LIFECYCLE__DRY_RUN", "false");
            jail.set_env("SNAPKEEPER__TIERING__DEFAULT_LOCK_FLOOR", "warm");
            jail.set_env("SNAPKEEPER__SCHEDULER__TICK_INTERVAL", "10m");

            let config = Configuration::load().map_err(|e| *e)?;

            assert_eq!(config.database.dsn, "sqlite://./test.db");
            assert!(!config.lifecycle.dry_run);
            assert_eq!(config.tiering.default_lock_floor, TierType::Warm);
            assert_eq!(config.scheduler.tick_interval, Duration::from_secs(600));
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_with_humantime_durations() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [cold_restore]
                retention_window = "2days"
                default_retrieval_time = "12h"

                [transitions]
                batch_size = 10
                concurrency = 2
                claim_timeout = "30m"
                "#,
            )?;

            let config =
                Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(
                config.cold_restore.retention_window,
                Duration::from_secs(2 * 24 * 3600)
            );
            assert_eq!(
                config.cold_restore.default_retrieval_time,
                Duration::from_secs(12 * 3600)
            );
            assert_eq!(config.transitions.batch_size, 10);
            assert_eq!(config.transitions.concurrency, 2);
            assert_eq!(config.transitions.claim_timeout, Duration::from_secs(1800));
            assert_eq!(config.lifecycle.lease_ttl, Duration::from_secs(900));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_tier_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SNAPKEEPER__COST__SAVINGS_TARGET_TIER", "glacier");
            assert!(Configuration::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Configuration::default();
        config.database.dsn = String::new();
        assert_eq!(config.validate(), Err(ConfigError::Empty("database.dsn")));

        let mut config = Configuration::default();
        config.transitions.concurrency = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("transitions.concurrency"))
        );

        let mut config = Configuration::default();
        config.transitions.claim_timeout = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("transitions.claim_timeout"))
        );

        let mut config = Configuration::default();
        config.cost.savings_fraction = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::FractionOutOfRange(1.5)));

        let mut config = Configuration::default();
        config.cost.savings_target_tier = TierType::Hot;
        assert_eq!(config.validate(), Err(ConfigError::SavingsTargetNotColder));

        let mut config = Configuration::default();
        config.cold_restore.retention_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
