//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a detected package-level discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same package, differing versions
    VersionMismatch,
    /// Package required by the target but unavailable to the endpoint
    MissingPackage,
    /// Dependency requirements cannot be satisfied together
    DependencyConflict,
    /// A repository the package comes from is unreachable
    RepositoryUnavailable,
}

impl ConflictKind {
    /// Stable string form used in storage and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version_mismatch",
            Self::MissingPackage => "missing_package",
            Self::DependencyConflict => "dependency_conflict",
            Self::RepositoryUnavailable => "repository_unavailable",
        }
    }
}

impl FromStr for ConflictKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version_mismatch" => Ok(Self::VersionMismatch),
            "missing_package" => Ok(Self::MissingPackage),
            "dependency_conflict" => Ok(Self::DependencyConflict),
            "repository_unavailable" => Ok(Self::RepositoryUnavailable),
            other => Err(format!("unknown conflict kind: {other}")),
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected package-level discrepancy blocking automatic synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub kind: ConflictKind,
    /// Package the conflict is about
    pub package: String,
    /// Value on the endpoint, when known (e.g. installed version)
    pub current: Option<String>,
    /// Value in the target, when known
    pub target: Option<String>,
    /// Human-readable suggestion for the operator
    pub suggested_resolution: String,
}

impl SyncConflict {
    /// Version divergence between an endpoint and the target state
    #[must_use]
    pub fn version_mismatch(
        package: impl Into<String>,
        current: impl Into<String>,
        target: impl Into<String>,
        suggested_resolution: impl Into<String>,
    ) -> Self {
        Self {
            kind: ConflictKind::VersionMismatch,
            package: package.into(),
            current: Some(current.into()),
            target: Some(target.into()),
            suggested_resolution: suggested_resolution.into(),
        }
    }
}
