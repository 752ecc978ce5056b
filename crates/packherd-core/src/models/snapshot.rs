//! System-state snapshots and repository listings

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::SyncConflict;
use super::endpoint::EndpointId;
use super::pool::PoolId;

/// A unique identifier for a snapshot, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Create a new unique snapshot ID using UUID v7
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

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One installed package inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    /// Source repository the package was installed from
    pub repository: String,
    /// Installed size in bytes
    pub installed_size: i64,
    /// Names of direct dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// An immutable, timestamped record of one endpoint's full package list.
///
/// Corrections require a new snapshot, never an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    /// Unique identifier
    pub id: SnapshotId,
    /// Endpoint the snapshot was captured from
    pub endpoint_id: EndpointId,
    /// Pool context the snapshot was captured in
    pub pool_id: PoolId,
    /// Capture timestamp (Unix ms)
    pub captured_at: i64,
    /// Machine architecture, e.g. `x86_64`
    pub architecture: String,
    /// Package manager version string
    pub pacman_version: String,
    /// Ordered list of installed packages
    pub packages: Vec<PackageEntry>,
}

impl SystemState {
    /// Capture a new snapshot for an endpoint in a pool context
    #[must_use]
    pub fn capture(
        endpoint_id: EndpointId,
        pool_id: PoolId,
        architecture: impl Into<String>,
        pacman_version: impl Into<String>,
        packages: Vec<PackageEntry>,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            endpoint_id,
            pool_id,
            captured_at: crate::util::unix_timestamp_ms(),
            architecture: architecture.into(),
            pacman_version: pacman_version.into(),
            packages,
        }
    }

    /// View the package list as a name-keyed map
    #[must_use]
    pub fn package_map(&self) -> HashMap<&str, &PackageEntry> {
        self.packages
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect()
    }

    /// Whether two package lists are equal by name and version,
    /// irrespective of ordering
    #[must_use]
    pub fn packages_equal(a: &[PackageEntry], b: &[PackageEntry]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut left: Vec<(&str, &str)> = a
            .iter()
            .map(|entry| (entry.name.as_str(), entry.version.as_str()))
            .collect();
        let mut right: Vec<(&str, &str)> = b
            .iter()
            .map(|entry| (entry.name.as_str(), entry.version.as_str()))
            .collect();
        left.sort_unstable();
        right.sort_unstable();
        left == right
    }
}

/// One package advertised by an endpoint's repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPackage {
    pub name: String,
    pub version: String,
    pub architecture: String,
}

/// Pool-wide computation of which packages are installable everywhere.
///
/// Always fully recomputed from the latest submitted listings, never
/// incrementally patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityAnalysis {
    pub pool_id: PoolId,
    /// Packages available, by name, from every member's repositories
    pub common_packages: Vec<String>,
    /// Packages available to some members but not all
    pub excluded_packages: Vec<String>,
    /// Version divergence among commonly available packages
    pub conflicts: Vec<SyncConflict>,
    /// Computation timestamp (Unix ms)
    pub computed_at: i64,
}

impl CompatibilityAnalysis {
    /// Whether `package` is excluded from pool-wide scheduling
    #[must_use]
    pub fn is_excluded(&self, package: &str) -> bool {
        self.excluded_packages.iter().any(|name| name == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, version: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            repository: "core".to_string(),
            installed_size: 1024,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn snapshot_id_roundtrip() {
        let id = SnapshotId::new();
        let parsed: SnapshotId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn package_equality_ignores_order() {
        let a = vec![pkg("foo", "1.0"), pkg("bar", "2.0")];
        let b = vec![pkg("bar", "2.0"), pkg("foo", "1.0")];
        assert!(SystemState::packages_equal(&a, &b));
    }

    #[test]
    fn package_equality_sees_version_drift() {
        let a = vec![pkg("foo", "1.0")];
        let b = vec![pkg("foo", "1.1")];
        assert!(!SystemState::packages_equal(&a, &b));
        assert!(!SystemState::packages_equal(&a, &[]));
    }

    #[test]
    fn package_map_is_name_keyed() {
        let state = SystemState::capture(
            EndpointId::new(),
            PoolId::new(),
            "x86_64",
            "pacman 6.1.0",
            vec![pkg("foo", "1.0"), pkg("bar", "2.0")],
        );
        let map = state.package_map();
        assert_eq!(map.get("foo").unwrap().version, "1.0");
        assert_eq!(map.get("bar").unwrap().version, "2.0");
        assert!(!map.contains_key("baz"));
    }

    #[test]
    fn package_entry_dependencies_default_on_deserialize() {
        let entry: PackageEntry = serde_json::from_str(
            r#"{"name":"foo","version":"1.0","repository":"core","installed_size":10}"#,
        )
        .unwrap();
        assert!(entry.dependencies.is_empty());
    }
}
