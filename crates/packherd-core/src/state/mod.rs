//! Snapshot history and target-state management.
//!
//! All writes go through one connection guarded by a mutex, so target
//! updates and their status fan-out are observed atomically: readers
//! either see the pool before the change or after the whole fan-out.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, EndpointStore, PoolStore, SnapshotStore};
use crate::error::{Error, Result};
use crate::models::{
    EndpointId, PackageEntry, PoolId, SnapshotId, StatusChange, SyncStatus, SystemState,
};

/// Persists system-state snapshots and maintains per-pool target state
#[derive(Clone)]
pub struct StateManager {
    db: Arc<Mutex<Database>>,
    retention: usize,
}

impl StateManager {
    /// Create a manager with the given per-endpoint retention cap
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>, retention: usize) -> Self {
        Self { db, retention }
    }

    /// Append a new immutable snapshot and prune history beyond the
    /// retention cap (current pool targets are never pruned)
    pub async fn create_snapshot(
        &self,
        endpoint_id: EndpointId,
        pool_id: PoolId,
        architecture: impl Into<String>,
        pacman_version: impl Into<String>,
        packages: Vec<PackageEntry>,
    ) -> Result<SystemState> {
        let state = SystemState::capture(endpoint_id, pool_id, architecture, pacman_version, packages);

        let db = self.db.lock().await;
        SnapshotStore::new(db.connection()).insert(&state).await?;
        self.prune_locked(&db, &endpoint_id).await?;

        tracing::debug!(snapshot = %state.id, endpoint = %endpoint_id, "snapshot created");
        Ok(state)
    }

    /// Make `snapshot_id` the pool's target and recompute every member's
    /// status against it.
    ///
    /// Fails with `Validation` if the snapshot was not captured in this
    /// pool. The target update and the full fan-out commit together or
    /// not at all.
    pub async fn set_target_state(
        &self,
        pool_id: &PoolId,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<StatusChange>> {
        let db = self.db.lock().await;
        let target = SnapshotStore::new(db.connection())
            .get_required(snapshot_id)
            .await?;
        if target.pool_id != *pool_id {
            return Err(Error::Validation(format!(
                "snapshot {snapshot_id} does not belong to pool {pool_id}"
            )));
        }
        PoolStore::new(db.connection()).get_required(pool_id).await?;

        db.begin().await?;
        let result = self.apply_target_locked(&db, pool_id, &target).await;
        match result {
            Ok(changes) => {
                db.commit().await?;
                tracing::info!(pool = %pool_id, snapshot = %snapshot_id, changed = changes.len(),
                    "target state updated");
                Ok(changes)
            }
            Err(error) => {
                db.rollback().await;
                Err(error)
            }
        }
    }

    /// Persist a freshly captured state and make it the pool target in
    /// one transaction: either both the snapshot and the target update
    /// land, or neither does.
    pub async fn snapshot_as_target(
        &self,
        endpoint_id: EndpointId,
        pool_id: PoolId,
        architecture: impl Into<String>,
        pacman_version: impl Into<String>,
        packages: Vec<PackageEntry>,
    ) -> Result<(SystemState, Vec<StatusChange>)> {
        let state = SystemState::capture(endpoint_id, pool_id, architecture, pacman_version, packages);

        let db = self.db.lock().await;
        db.begin().await?;
        let result = async {
            SnapshotStore::new(db.connection()).insert(&state).await?;
            self.apply_target_locked(&db, &pool_id, &state).await
        }
        .await;

        match result {
            Ok(changes) => {
                db.commit().await?;
                self.prune_locked(&db, &endpoint_id).await?;
                tracing::info!(pool = %pool_id, snapshot = %state.id, "captured state set as target");
                Ok((state, changes))
            }
            Err(error) => {
                db.rollback().await;
                Err(error)
            }
        }
    }

    /// Most recent snapshot for an endpoint prior to its pool's current
    /// target, used for revert
    pub async fn get_previous_state(&self, endpoint_id: &EndpointId) -> Result<SystemState> {
        let db = self.db.lock().await;
        let endpoint = EndpointStore::new(db.connection()).get_active(endpoint_id).await?;
        let pool_id = endpoint
            .pool_id
            .ok_or_else(|| Error::Validation(format!("endpoint {endpoint_id} is not in a pool")))?;
        let pool = PoolStore::new(db.connection()).get_required(&pool_id).await?;
        let target_id = pool
            .target_state_id
            .ok_or_else(|| Error::NotFound(format!("pool {pool_id} has no target state")))?;

        let snapshots = SnapshotStore::new(db.connection());
        let target = snapshots.get_required(&target_id).await?;
        snapshots
            .latest_before(endpoint_id, target.captured_at)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("no snapshot for endpoint {endpoint_id} before target"))
            })
    }

    /// Fetch a snapshot by id
    pub async fn get_snapshot(&self, id: &SnapshotId) -> Result<SystemState> {
        let db = self.db.lock().await;
        SnapshotStore::new(db.connection()).get_required(id).await
    }

    /// Most recent snapshot for an endpoint, if any
    pub async fn latest_snapshot(&self, endpoint_id: &EndpointId) -> Result<Option<SystemState>> {
        let db = self.db.lock().await;
        SnapshotStore::new(db.connection())
            .latest_for_endpoint(endpoint_id)
            .await
    }

    /// List an endpoint's snapshots, newest first
    pub async fn list_snapshots(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SystemState>> {
        let db = self.db.lock().await;
        SnapshotStore::new(db.connection())
            .list_for_endpoint(endpoint_id, limit)
            .await
    }

    /// Set the target pointer and recompute member statuses; must run
    /// inside an open transaction
    async fn apply_target_locked(
        &self,
        db: &Database,
        pool_id: &PoolId,
        target: &SystemState,
    ) -> Result<Vec<StatusChange>> {
        PoolStore::new(db.connection()).set_target(pool_id, &target.id).await?;

        let endpoints = EndpointStore::new(db.connection());
        let snapshots = SnapshotStore::new(db.connection());
        let members = endpoints.list_by_pool(pool_id).await?;

        let mut changes = Vec::new();
        for member in members {
            // Reachability wins: an offline member stays offline until
            // it reports again
            if member.sync_status == SyncStatus::Offline {
                continue;
            }

            let status = if member.id == target.endpoint_id {
                SyncStatus::InSync
            } else {
                match snapshots.latest_for_endpoint(&member.id).await? {
                    Some(latest)
                        if SystemState::packages_equal(&latest.packages, &target.packages) =>
                    {
                        SyncStatus::InSync
                    }
                    _ => SyncStatus::Behind,
                }
            };

            if status != member.sync_status {
                endpoints.set_status(&member.id, status).await?;
                changes.push(StatusChange {
                    endpoint_id: member.id,
                    status,
                });
            }
        }
        Ok(changes)
    }

    /// Prune one endpoint's history beyond the retention cap
    async fn prune_locked(&self, db: &Database, endpoint_id: &EndpointId) -> Result<()> {
        let protected = PoolStore::new(db.connection()).target_snapshot_ids().await?;
        SnapshotStore::new(db.connection())
            .prune(endpoint_id, self.retention, &protected)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, Pool, SyncPolicy};

    fn pkg(name: &str, version: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            repository: "core".to_string(),
            installed_size: 1024,
            dependencies: Vec::new(),
        }
    }

    struct Fixture {
        manager: StateManager,
        db: Arc<Mutex<Database>>,
        pool: Pool,
        e1: Endpoint,
        e2: Endpoint,
    }

    async fn setup(retention: usize) -> Fixture {
        let db = Arc::new(Mutex::new(Database::open_in_memory().await.unwrap()));
        let manager = StateManager::new(db.clone(), retention);

        let pool = Pool::new("workstations", "", SyncPolicy::default());
        let mut e1 = Endpoint::new("e1", "e1.lan");
        e1.pool_id = Some(pool.id);
        let mut e2 = Endpoint::new("e2", "e2.lan");
        e2.pool_id = Some(pool.id);

        {
            let guard = db.lock().await;
            PoolStore::new(guard.connection()).insert(&pool).await.unwrap();
            let endpoints = EndpointStore::new(guard.connection());
            endpoints.insert(&e1).await.unwrap();
            endpoints.insert(&e2).await.unwrap();
        }

        Fixture {
            manager,
            db,
            pool,
            e1,
            e2,
        }
    }

    async fn endpoint_status(fixture: &Fixture, id: &EndpointId) -> SyncStatus {
        let guard = fixture.db.lock().await;
        EndpointStore::new(guard.connection())
            .get(id)
            .await
            .unwrap()
            .unwrap()
            .sync_status
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_target_fans_out_behind_status() {
        let fixture = setup(10).await;

        let state = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();

        let changes = fixture
            .manager
            .set_target_state(&fixture.pool.id, &state.id)
            .await
            .unwrap();

        assert_eq!(endpoint_status(&fixture, &fixture.e1.id).await, SyncStatus::InSync);
        assert_eq!(endpoint_status(&fixture, &fixture.e2.id).await, SyncStatus::Behind);
        assert_eq!(changes.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sibling_with_equal_packages_is_in_sync() {
        let fixture = setup(10).await;

        fixture
            .manager
            .create_snapshot(
                fixture.e2.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();
        let target = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();

        fixture
            .manager
            .set_target_state(&fixture.pool.id, &target.id)
            .await
            .unwrap();

        assert_eq!(endpoint_status(&fixture, &fixture.e2.id).await, SyncStatus::InSync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_member_keeps_offline_status() {
        let fixture = setup(10).await;
        {
            let guard = fixture.db.lock().await;
            EndpointStore::new(guard.connection())
                .set_status(&fixture.e2.id, SyncStatus::Offline)
                .await
                .unwrap();
        }

        let state = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();
        fixture
            .manager
            .set_target_state(&fixture.pool.id, &state.id)
            .await
            .unwrap();

        assert_eq!(endpoint_status(&fixture, &fixture.e2.id).await, SyncStatus::Offline);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn target_from_another_pool_is_rejected() {
        let fixture = setup(10).await;
        let foreign_pool = Pool::new("servers", "", SyncPolicy::default());
        {
            let guard = fixture.db.lock().await;
            PoolStore::new(guard.connection())
                .insert(&foreign_pool)
                .await
                .unwrap();
        }

        let state = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                foreign_pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();

        let err = fixture
            .manager
            .set_target_state(&fixture.pool.id, &state.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn previous_state_is_the_snapshot_before_the_target() {
        let fixture = setup(10).await;

        let first = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();
        // Snapshot capture timestamps must differ for ordering
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.1")],
            )
            .await
            .unwrap();

        fixture
            .manager
            .set_target_state(&fixture.pool.id, &second.id)
            .await
            .unwrap();

        let previous = fixture.manager.get_previous_state(&fixture.e1.id).await.unwrap();
        assert_eq!(previous.id, first.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retention_prunes_oldest_but_never_the_target() {
        let fixture = setup(2).await;

        let target = fixture
            .manager
            .create_snapshot(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0")],
            )
            .await
            .unwrap();
        fixture
            .manager
            .set_target_state(&fixture.pool.id, &target.id)
            .await
            .unwrap();

        for minor in 1..=4 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            fixture
                .manager
                .create_snapshot(
                    fixture.e1.id,
                    fixture.pool.id,
                    "x86_64",
                    "pacman 6.1.0",
                    vec![pkg("foo", &format!("1.{minor}"))],
                )
                .await
                .unwrap();
        }

        // Cap is 2, but the pool target must survive pruning
        assert!(fixture.manager.get_snapshot(&target.id).await.is_ok());
        let history = fixture.manager.list_snapshots(&fixture.e1.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_as_target_is_atomic_and_fans_out() {
        let fixture = setup(10).await;

        let (state, changes) = fixture
            .manager
            .snapshot_as_target(
                fixture.e1.id,
                fixture.pool.id,
                "x86_64",
                "pacman 6.1.0",
                vec![pkg("foo", "1.0"), pkg("bar", "2.0")],
            )
            .await
            .unwrap();

        let pool = {
            let guard = fixture.db.lock().await;
            PoolStore::new(guard.connection())
                .get_required(&fixture.pool.id)
                .await
                .unwrap()
        };
        assert_eq!(pool.target_state_id, Some(state.id));
        assert!(changes
            .iter()
            .any(|change| change.endpoint_id == fixture.e2.id
                && change.status == SyncStatus::Behind));
    }
}
