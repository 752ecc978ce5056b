//! Endpoint model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pool::PoolId;

/// A unique identifier for an endpoint, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    /// Create a new unique endpoint ID using UUID v7
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

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where an endpoint stands relative to its pool's target state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InSync,
    Ahead,
    Behind,
    Offline,
    Unknown,
}

impl SyncStatus {
    /// Stable string form used in storage and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InSync => "in_sync",
            Self::Ahead => "ahead",
            Self::Behind => "behind",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_sync" => Ok(Self::InSync),
            "ahead" => Ok(Self::Ahead),
            "behind" => Ok(Self::Behind),
            "offline" => Ok(Self::Offline),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed machine participating in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier
    pub id: EndpointId,
    /// Display name
    pub name: String,
    /// Network hostname
    pub hostname: String,
    /// Owning pool, if assigned
    pub pool_id: Option<PoolId>,
    /// Last status report timestamp (Unix ms)
    pub last_seen: i64,
    /// Standing relative to the pool target
    pub sync_status: SyncStatus,
    /// Soft-removal flag; removed endpoints stay referenced by history
    pub is_removed: bool,
}

impl Endpoint {
    /// Create a new unassigned endpoint
    #[must_use]
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: EndpointId::new(),
            name: name.into(),
            hostname: hostname.into(),
            pool_id: None,
            last_seen: crate::util::unix_timestamp_ms(),
            sync_status: SyncStatus::Unknown,
            is_removed: false,
        }
    }

    /// Whether `last_seen` is older than the given offline window
    #[must_use]
    pub const fn is_stale(&self, now_ms: i64, offline_after_ms: i64) -> bool {
        now_ms - self.last_seen > offline_after_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_roundtrip() {
        let id = EndpointId::new();
        let parsed: EndpointId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn sync_status_string_roundtrip() {
        for status in [
            SyncStatus::InSync,
            SyncStatus::Ahead,
            SyncStatus::Behind,
            SyncStatus::Offline,
            SyncStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn new_endpoint_is_unassigned_and_unknown() {
        let endpoint = Endpoint::new("workstation", "ws1.lan");
        assert!(endpoint.pool_id.is_none());
        assert_eq!(endpoint.sync_status, SyncStatus::Unknown);
        assert!(!endpoint.is_removed);
    }

    #[test]
    fn staleness_respects_window() {
        let mut endpoint = Endpoint::new("ws", "ws.lan");
        endpoint.last_seen = 1_000;
        assert!(endpoint.is_stale(5_000, 3_000));
        assert!(!endpoint.is_stale(3_500, 3_000));
    }
}
