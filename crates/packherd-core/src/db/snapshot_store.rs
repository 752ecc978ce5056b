//! Snapshot storage.
//!
//! Snapshots are append-only: rows are inserted and pruned, never
//! updated.

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{EndpointId, SnapshotId, SystemState};

/// Store for immutable system-state snapshots
pub struct SnapshotStore<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a snapshot; never overwrites
    pub async fn insert(&self, state: &SystemState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO snapshots (id, endpoint_id, pool_id, captured_at, architecture,
                 pacman_version, packages)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    state.id.as_str(),
                    state.endpoint_id.as_str(),
                    state.pool_id.as_str(),
                    state.captured_at,
                    state.architecture.clone(),
                    state.pacman_version.clone(),
                    serde_json::to_string(&state.packages)?,
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetch a snapshot by id
    pub async fn get(&self, id: &SnapshotId) -> Result<Option<SystemState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, endpoint_id, pool_id, captured_at, architecture, pacman_version, packages
                 FROM snapshots WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_snapshot(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch a snapshot by id or fail with `NotFound`
    pub async fn get_required(&self, id: &SnapshotId) -> Result<SystemState> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot {id}")))
    }

    /// Most recent snapshot for an endpoint
    pub async fn latest_for_endpoint(&self, endpoint_id: &EndpointId) -> Result<Option<SystemState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, endpoint_id, pool_id, captured_at, architecture, pacman_version, packages
                 FROM snapshots WHERE endpoint_id = ?
                 ORDER BY captured_at DESC, id DESC LIMIT 1",
                params![endpoint_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_snapshot(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recent snapshot for an endpoint captured strictly before
    /// the given timestamp
    pub async fn latest_before(
        &self,
        endpoint_id: &EndpointId,
        captured_before_ms: i64,
    ) -> Result<Option<SystemState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, endpoint_id, pool_id, captured_at, architecture, pacman_version, packages
                 FROM snapshots WHERE endpoint_id = ? AND captured_at < ?
                 ORDER BY captured_at DESC, id DESC LIMIT 1",
                params![endpoint_id.as_str(), captured_before_ms],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_snapshot(&row)?)),
            None => Ok(None),
        }
    }

    /// List an endpoint's snapshots, newest first
    pub async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SystemState>> {
        #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
        let mut rows = self
            .conn
            .query(
                "SELECT id, endpoint_id, pool_id, captured_at, architecture, pacman_version, packages
                 FROM snapshots WHERE endpoint_id = ?
                 ORDER BY captured_at DESC, id DESC LIMIT ?",
                params![endpoint_id.as_str(), limit as i64],
            )
            .await?;

        let mut snapshots = Vec::new();
        while let Some(row) = rows.next().await? {
            snapshots.push(parse_snapshot(&row)?);
        }
        Ok(snapshots)
    }

    /// Prune an endpoint's history down to `keep` snapshots, oldest
    /// first, never touching ids in `protected`
    pub async fn prune(
        &self,
        endpoint_id: &EndpointId,
        keep: usize,
        protected: &[SnapshotId],
    ) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM snapshots WHERE endpoint_id = ?
                 ORDER BY captured_at DESC, id DESC",
                params![endpoint_id.as_str()],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(0)?;
            ids.push(raw);
        }

        let protected: Vec<String> = protected.iter().map(SnapshotId::as_str).collect();
        let mut pruned = 0;
        for raw in ids.iter().skip(keep) {
            if protected.contains(raw) {
                continue;
            }
            self.conn
                .execute("DELETE FROM snapshots WHERE id = ?", params![raw.clone()])
                .await?;
            pruned += 1;
        }

        if pruned > 0 {
            tracing::debug!(endpoint = %endpoint_id, pruned, "pruned snapshot history");
        }
        Ok(pruned)
    }
}

fn parse_snapshot(row: &Row) -> Result<SystemState> {
    let id: String = row.get(0)?;
    let endpoint_id: String = row.get(1)?;
    let pool_id: String = row.get(2)?;
    let packages_raw: String = row.get(6)?;

    Ok(SystemState {
        id: id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid snapshot id: {id}")))?,
        endpoint_id: endpoint_id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid endpoint id: {endpoint_id}")))?,
        pool_id: pool_id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid pool id: {pool_id}")))?,
        captured_at: row.get(3)?,
        architecture: row.get(4)?,
        pacman_version: row.get(5)?,
        packages: serde_json::from_str(&packages_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{PackageEntry, PoolId};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn pkg(name: &str, version: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            repository: "core".to_string(),
            installed_size: 4096,
            dependencies: vec!["glibc".to_string()],
        }
    }

    fn snapshot_at(endpoint_id: EndpointId, pool_id: PoolId, captured_at: i64) -> SystemState {
        let mut state = SystemState::capture(
            endpoint_id,
            pool_id,
            "x86_64",
            "pacman 6.1.0",
            vec![pkg("foo", "1.0")],
        );
        state.captured_at = captured_at;
        state
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_and_get_roundtrip() {
        let db = setup().await;
        let store = SnapshotStore::new(db.connection());

        let state = snapshot_at(EndpointId::new(), PoolId::new(), 1_000);
        store.insert(&state).await.unwrap();

        let fetched = store.get(&state.id).await.unwrap().unwrap();
        assert_eq!(fetched, state);
        assert_eq!(fetched.packages[0].dependencies, vec!["glibc".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn latest_and_latest_before() {
        let db = setup().await;
        let store = SnapshotStore::new(db.connection());
        let endpoint_id = EndpointId::new();
        let pool_id = PoolId::new();

        let old = snapshot_at(endpoint_id, pool_id, 1_000);
        let mid = snapshot_at(endpoint_id, pool_id, 2_000);
        let new = snapshot_at(endpoint_id, pool_id, 3_000);
        for state in [&old, &mid, &new] {
            store.insert(state).await.unwrap();
        }

        let latest = store.latest_for_endpoint(&endpoint_id).await.unwrap().unwrap();
        assert_eq!(latest.id, new.id);

        let previous = store.latest_before(&endpoint_id, 3_000).await.unwrap().unwrap();
        assert_eq!(previous.id, mid.id);

        assert!(store.latest_before(&endpoint_id, 1_000).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prune_keeps_newest_and_protected() {
        let db = setup().await;
        let store = SnapshotStore::new(db.connection());
        let endpoint_id = EndpointId::new();
        let pool_id = PoolId::new();

        let oldest = snapshot_at(endpoint_id, pool_id, 1_000);
        let older = snapshot_at(endpoint_id, pool_id, 2_000);
        let newer = snapshot_at(endpoint_id, pool_id, 3_000);
        let newest = snapshot_at(endpoint_id, pool_id, 4_000);
        for state in [&oldest, &older, &newer, &newest] {
            store.insert(state).await.unwrap();
        }

        let pruned = store.prune(&endpoint_id, 2, &[oldest.id]).await.unwrap();
        assert_eq!(pruned, 1);

        // Newest two survive the cap; oldest survives via protection
        assert!(store.get(&newest.id).await.unwrap().is_some());
        assert!(store.get(&newer.id).await.unwrap().is_some());
        assert!(store.get(&older.id).await.unwrap().is_none());
        assert!(store.get(&oldest.id).await.unwrap().is_some());
    }
}
