use super::{SnapshotKey, TierType, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Object-lock mode mirrored onto the storage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderLockMode {
    Governance,
    Compliance,
}

impl ProviderLockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderLockMode::Governance => "governance",
            ProviderLockMode::Compliance => "compliance",
        }
    }
}

impl fmt::Display for ProviderLockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderLockMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "governance" => Ok(ProviderLockMode::Governance),
            "compliance" => Ok(ProviderLockMode::Compliance),
            other => Err(ValidationError::UnknownValue {
                kind: "provider lock mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Time-bounded protection against deletion and sub-floor tiering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmutabilityLock {
    pub id: Uuid,
    pub org_id: Uuid,
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub locked_at: DateTime<Utc>,
    pub locked_until: DateTime<Utc>,
    pub locked_by: String,
    pub reason: String,
    pub provider_lock_enabled: bool,
    pub provider_lock_mode: Option<ProviderLockMode>,
    /// Coldest tier the snapshot may be moved to while locked. `None` falls
    /// back to the configured default floor.
    pub floor_tier: Option<TierType>,
}

impl ImmutabilityLock {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.locked_until
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.locked_by.trim().is_empty() {
            return Err(ValidationError::EmptyField("locked_by"));
        }
        if self.locked_until <= self.locked_at {
            return Err(ValidationError::LockWindow(self.snapshot_id.clone()));
        }
        Ok(())
    }

    /// Merge a re-lock request into this lock.
    ///
    /// `locked_until` only ever moves forward; the reason always follows the
    /// latest request. A floor can be lowered to a warmer tier but not
    /// relaxed to a colder one. A lock without a floor follows the
    /// configured default, and a re-lock cannot replace that with an
    /// explicit floor.
    pub fn extend_with(&mut self, other: &ImmutabilityLock) {
        if other.locked_until > self.locked_until {
            self.locked_until = other.locked_until;
        }
        self.reason = other.reason.clone();
        self.locked_by = other.locked_by.clone();
        self.provider_lock_enabled |= other.provider_lock_enabled;
        if other.provider_lock_mode.is_some() {
            self.provider_lock_mode = other.provider_lock_mode;
        }
        self.floor_tier = match (self.floor_tier, other.floor_tier) {
            (Some(current), Some(requested)) => Some(current.min(requested)),
            (Some(current), None) => Some(current),
            (None, _) => None,
        };
    }
}

/// Indefinite deletion block, removed only by explicit release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalHold {
    pub id: Uuid,
    pub org_id: Uuid,
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub reason: String,
    pub placed_by: String,
    pub placed_at: DateTime<Utc>,
}

impl LegalHold {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.repository_id, self.snapshot_id.clone())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reason.trim().is_empty() {
            return Err(ValidationError::EmptyField("legal hold reason"));
        }
        Ok(())
    }
}

/// Why a snapshot is protected, as reported by the guard layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionReasons {
    /// An immutability lock is active.
    pub immutable: bool,
    /// At least one legal hold exists.
    pub legally_held: bool,
    /// Floor of the active lock, if the lock names one.
    pub floor_tier: Option<TierType>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl ProtectionReasons {
    pub fn is_protected(&self) -> bool {
        self.immutable || self.legally_held
    }

    /// Whether moving to `to_tier` would drop below the lock's floor.
    ///
    /// Legal holds only block deletion and never constrain tiering.
    pub fn blocks_tier(&self, to_tier: TierType, default_floor: TierType) -> bool {
        self.immutable && to_tier.is_colder_than(self.floor_tier.unwrap_or(default_floor))
    }
}
