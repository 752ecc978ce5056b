//! Pool model and sync policy

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::{EndpointId, SyncStatus};
use super::snapshot::SnapshotId;

/// A unique identifier for a pool, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Create a new unique pool ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PoolId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How version divergence between current and target state is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Surface conflicts to the operator, never auto-select
    Manual,
    /// Auto-select the newer version
    Newest,
    /// Auto-select the older version
    Oldest,
}

impl ConflictResolution {
    /// Stable string form used in storage and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => Err(format!("unknown conflict resolution: {other}")),
        }
    }
}

/// Per-pool synchronization policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Sync members automatically when the target changes
    pub auto_sync: bool,
    /// Package names never scheduled by the coordinator
    pub exclude_packages: BTreeSet<String>,
    /// Whether AUR packages participate in compatibility analysis
    pub include_aur: bool,
    /// Version divergence resolution strategy
    pub conflict_resolution: ConflictResolution,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            auto_sync: false,
            exclude_packages: BTreeSet::new(),
            include_aur: false,
            conflict_resolution: ConflictResolution::Manual,
        }
    }
}

/// A named group of endpoints intended to converge on the same package set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Unique identifier
    pub id: PoolId,
    /// Unique display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Snapshot all members should converge to, once set
    pub target_state_id: Option<SnapshotId>,
    /// Synchronization policy
    pub policy: SyncPolicy,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Pool {
    /// Create a new pool with no target state
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, policy: SyncPolicy) -> Self {
        Self {
            id: PoolId::new(),
            name: name.into(),
            description: description.into(),
            target_state_id: None,
            policy,
            created_at: crate::util::unix_timestamp_ms(),
        }
    }
}

/// Aggregate convergence state of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every member is in sync
    InSync,
    /// At least one member diverges from the target
    Drifted,
    /// At least one member is offline
    Degraded,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InSync => "in_sync",
            Self::Drifted => "drifted",
            Self::Degraded => "degraded",
        })
    }
}

/// Point-in-time view of a pool's members and their convergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub pool_id: PoolId,
    /// Per-member statuses, in membership order
    pub endpoints: Vec<(EndpointId, SyncStatus)>,
    /// Fraction of members whose status is `in_sync`, in `[0, 1]`
    pub sync_percentage: f64,
    pub overall_status: OverallStatus,
}

impl PoolStatus {
    /// Derive the aggregate view from member statuses
    #[must_use]
    pub fn from_members(pool_id: PoolId, endpoints: Vec<(EndpointId, SyncStatus)>) -> Self {
        let total = endpoints.len();
        let in_sync = endpoints
            .iter()
            .filter(|(_, status)| *status == SyncStatus::InSync)
            .count();
        let any_offline = endpoints
            .iter()
            .any(|(_, status)| *status == SyncStatus::Offline);

        let overall_status = if any_offline {
            OverallStatus::Degraded
        } else if total > 0 && in_sync == total {
            OverallStatus::InSync
        } else {
            OverallStatus::Drifted
        };

        #[allow(clippy::cast_precision_loss)]
        let sync_percentage = if total == 0 {
            0.0
        } else {
            in_sync as f64 / total as f64
        };

        Self {
            pool_id,
            endpoints,
            sync_percentage,
            overall_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_id_roundtrip() {
        let id = PoolId::new();
        let parsed: PoolId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn default_policy_is_manual() {
        let policy = SyncPolicy::default();
        assert!(!policy.auto_sync);
        assert!(policy.exclude_packages.is_empty());
        assert_eq!(policy.conflict_resolution, ConflictResolution::Manual);
    }

    #[test]
    fn status_all_in_sync() {
        let status = PoolStatus::from_members(
            PoolId::new(),
            vec![
                (EndpointId::new(), SyncStatus::InSync),
                (EndpointId::new(), SyncStatus::InSync),
            ],
        );
        assert_eq!(status.overall_status, OverallStatus::InSync);
        assert!((status.sync_percentage - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn offline_member_degrades_pool() {
        let status = PoolStatus::from_members(
            PoolId::new(),
            vec![
                (EndpointId::new(), SyncStatus::InSync),
                (EndpointId::new(), SyncStatus::Offline),
            ],
        );
        assert_eq!(status.overall_status, OverallStatus::Degraded);
        assert!((status.sync_percentage - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn behind_member_means_drifted() {
        let status = PoolStatus::from_members(
            PoolId::new(),
            vec![
                (EndpointId::new(), SyncStatus::InSync),
                (EndpointId::new(), SyncStatus::Behind),
            ],
        );
        assert_eq!(status.overall_status, OverallStatus::Drifted);
    }

    #[test]
    fn empty_pool_is_drifted_not_in_sync() {
        let status = PoolStatus::from_members(PoolId::new(), Vec::new());
        assert_eq!(status.overall_status, OverallStatus::Drifted);
        assert!(status.sync_percentage.abs() < f64::EPSILON);
    }
}
