use super::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cost/performance class a snapshot's data lives in.
///
/// Ordering follows coldness: `Hot < Warm < Cold < Archive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierType {
    /// Primary storage, immediately restorable.
    Hot,
    /// Infrequent-access storage, still directly readable.
    Warm,
    /// Cold storage, requires a retrieval before restore.
    Cold,
    /// Deep archive, slowest and cheapest retrieval.
    Archive,
}

impl TierType {
    pub const ALL: [TierType; 4] = [
        TierType::Hot,
        TierType::Warm,
        TierType::Cold,
        TierType::Archive,
    ];

    /// Numeric coldness rank (higher = colder).
    pub fn coldness(&self) -> u8 {
        match self {
            TierType::Hot => 0,
            TierType::Warm => 1,
            TierType::Cold => 2,
            TierType::Archive => 3,
        }
    }

    pub fn is_colder_than(&self, other: TierType) -> bool {
        self.coldness() > other.coldness()
    }

    /// Data in these tiers must be retrieved before it can be restored.
    pub fn is_cold_storage(&self) -> bool {
        matches!(self, TierType::Cold | TierType::Archive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierType::Hot => "hot",
            TierType::Warm => "warm",
            TierType::Cold => "cold",
            TierType::Archive => "archive",
        }
    }
}

impl fmt::Display for TierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hot" => Ok(TierType::Hot),
            "warm" => Ok(TierType::Warm),
            "cold" => Ok(TierType::Cold),
            "archive" => Ok(TierType::Archive),
            _ => Err(ValidationError::UnknownTier(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_str() {
        assert_eq!("hot".parse::<TierType>().unwrap(), TierType::Hot);
        assert_eq!("Warm".parse::<TierType>().unwrap(), TierType::Warm);
        assert_eq!("ARCHIVE".parse::<TierType>().unwrap(), TierType::Archive);
        assert!(matches!(
            "glacier".parse::<TierType>(),
            Err(ValidationError::UnknownTier(_))
        ));
    }

    #[test]
    fn test_coldness_ordering() {
        assert!(TierType::Archive.is_colder_than(TierType::Cold));
        assert!(TierType::Warm.is_colder_than(TierType::Hot));
        assert!(!TierType::Hot.is_colder_than(TierType::Hot));
        assert!(TierType::Hot < TierType::Archive);
    }

    #[test]
    fn test_cold_storage_tiers() {
        assert!(!TierType::Hot.is_cold_storage());
        assert!(!TierType::Warm.is_cold_storage());
        assert!(TierType::Cold.is_cold_storage());
        assert!(TierType::Archive.is_cold_storage());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&TierType::Cold).unwrap();
        assert_eq!(json, "\"cold\"");
        assert!(serde_json::from_str::<TierType>("\"frozen\"").is_err());
    }
}
