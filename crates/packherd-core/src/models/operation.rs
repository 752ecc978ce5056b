//! Sync operation model and action plans

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::SyncConflict;
use super::endpoint::EndpointId;
use super::pool::PoolId;
use super::snapshot::SnapshotId;

/// A unique identifier for a sync operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
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

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a sync operation is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Bring the endpoint to the pool's target state
    SyncToLatest,
    /// Make the endpoint's current state the pool's target
    SetAsLatest,
    /// Bring the endpoint back to its previous snapshot
    RevertToPrevious,
}

impl OperationKind {
    /// Stable string form used in storage and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncToLatest => "sync_to_latest",
            Self::SetAsLatest => "set_as_latest",
            Self::RevertToPrevious => "revert_to_previous",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_to_latest" => Ok(Self::SyncToLatest),
            "set_as_latest" => Ok(Self::SetAsLatest),
            "revert_to_previous" => Ok(Self::RevertToPrevious),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Lifecycle state of a sync operation.
///
/// Transitions are one-directional: `Pending` → `InProgress` →
/// (`Completed` | `Failed`), with `Cancelled` reachable only from
/// `Pending`. No state re-enters `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Stable string form used in storage and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this state ends the operation's lifecycle
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor must do to one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    // Declaration order is execution order: removals and downgrades
    // before upgrades and installs to minimize transient breakage.
    Remove,
    Downgrade,
    Upgrade,
    Install,
}

/// One entry of an ordered action plan handed to the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAction {
    pub kind: ActionKind,
    pub package: String,
    /// Version to end up at; absent for removals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageAction {
    #[must_use]
    pub fn remove(package: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Remove,
            package: package.into(),
            version: None,
        }
    }

    #[must_use]
    pub fn install(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Install,
            package: package.into(),
            version: Some(version.into()),
        }
    }

    #[must_use]
    pub fn upgrade(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Upgrade,
            package: package.into(),
            version: Some(version.into()),
        }
    }

    #[must_use]
    pub fn downgrade(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Downgrade,
            package: package.into(),
            version: Some(version.into()),
        }
    }
}

/// Structured payload attached to a sync operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDetail {
    /// Ordered action plan for the executor
    #[serde(default)]
    pub plan: Vec<PackageAction>,
    /// Conflicts that blocked or annotated the operation
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    /// Why the operation failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Snapshot produced by the operation, when one was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    /// Snapshot the plan converges to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_snapshot_id: Option<SnapshotId>,
    /// Whether the request was queued while the endpoint was offline
    #[serde(default)]
    pub queued: bool,
}

/// A tracked request to bring one endpoint into, or away from,
/// alignment with a target/previous state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique identifier
    pub id: OperationId,
    pub pool_id: PoolId,
    pub endpoint_id: EndpointId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub detail: OperationDetail,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Terminal-transition timestamp (Unix ms)
    pub completed_at: Option<i64>,
}

impl SyncOperation {
    /// Create a pending operation for an endpoint in a pool
    #[must_use]
    pub fn new(pool_id: PoolId, endpoint_id: EndpointId, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            pool_id,
            endpoint_id,
            kind,
            status: OperationStatus::Pending,
            detail: OperationDetail::default(),
            created_at: crate::util::unix_timestamp_ms(),
            completed_at: None,
        }
    }
}
