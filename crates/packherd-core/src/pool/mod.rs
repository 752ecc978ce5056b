//! Pool lifecycle, endpoint membership, and aggregate status.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, EndpointStore, PoolStore, SnapshotStore};
use crate::error::{Error, Result};
use crate::models::{
    Endpoint, EndpointId, Pool, PoolId, PoolStatus, StatusChange, SyncPolicy, SyncStatus,
    SystemState,
};
use crate::util::{is_valid_name, normalize_text_option, unix_timestamp_ms};

/// Fields that can change on an existing pool
#[derive(Debug, Clone, Default)]
pub struct PoolUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub policy: Option<SyncPolicy>,
}

/// Owns pool lifecycle, endpoint membership, and aggregate pool status
#[derive(Clone)]
pub struct PoolManager {
    db: Arc<Mutex<Database>>,
    offline_after_ms: i64,
}

impl PoolManager {
    /// Create a manager; `offline_after_ms` is the heartbeat silence
    /// window after which endpoints are swept offline
    #[must_use]
    pub const fn new(db: Arc<Mutex<Database>>, offline_after_ms: i64) -> Self {
        Self {
            db,
            offline_after_ms,
        }
    }

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    /// Create a pool; names must be non-empty and unique
    pub async fn create_pool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        policy: SyncPolicy,
    ) -> Result<Pool> {
        let name = normalize_text_option(Some(name.into()))
            .ok_or_else(|| Error::Validation("pool name must not be empty".to_string()))?;
        validate_policy(&policy)?;

        let db = self.db.lock().await;
        let store = PoolStore::new(db.connection());
        if store.get_by_name(&name).await?.is_some() {
            return Err(Error::Validation(format!("pool name already in use: {name}")));
        }

        let pool = Pool::new(name, description.into().trim().to_string(), policy);
        store.insert(&pool).await?;
        tracing::info!(pool = %pool.id, name = %pool.name, "pool created");
        Ok(pool)
    }

    /// Fetch a pool by id
    pub async fn get_pool(&self, id: &PoolId) -> Result<Pool> {
        let db = self.db.lock().await;
        PoolStore::new(db.connection()).get_required(id).await
    }

    /// Fetch a pool by its unique name
    pub async fn get_pool_by_name(&self, name: &str) -> Result<Pool> {
        let db = self.db.lock().await;
        PoolStore::new(db.connection())
            .get_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pool {name}")))
    }

    /// List pools, creation order
    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        let db = self.db.lock().await;
        PoolStore::new(db.connection()).list().await
    }

    /// Apply a partial update to a pool
    pub async fn update_pool(&self, id: &PoolId, update: PoolUpdate) -> Result<Pool> {
        let db = self.db.lock().await;
        let store = PoolStore::new(db.connection());
        let mut pool = store.get_required(id).await?;

        if let Some(name) = update.name {
            let name = normalize_text_option(Some(name))
                .ok_or_else(|| Error::Validation("pool name must not be empty".to_string()))?;
            if name != pool.name && store.get_by_name(&name).await?.is_some() {
                return Err(Error::Validation(format!("pool name already in use: {name}")));
            }
            pool.name = name;
        }
        if let Some(description) = update.description {
            pool.description = description.trim().to_string();
        }
        if let Some(policy) = update.policy {
            validate_policy(&policy)?;
            pool.policy = policy;
        }

        store.update(&pool).await?;
        Ok(pool)
    }

    /// Delete a pool: members are unassigned (never deleted) and
    /// historical snapshots stay intact for audit
    pub async fn delete_pool(&self, id: &PoolId) -> Result<()> {
        let db = self.db.lock().await;
        PoolStore::new(db.connection()).get_required(id).await?;

        db.begin().await?;
        let result = async {
            EndpointStore::new(db.connection()).unassign_pool(id).await?;
            PoolStore::new(db.connection()).delete(id).await
        }
        .await;

        match result {
            Ok(()) => {
                db.commit().await?;
                tracing::info!(pool = %id, "pool deleted, members unassigned");
                Ok(())
            }
            Err(error) => {
                db.rollback().await;
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Register a new endpoint, initially unassigned
    pub async fn register_endpoint(
        &self,
        name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Result<Endpoint> {
        let name = normalize_text_option(Some(name.into()))
            .ok_or_else(|| Error::Validation("endpoint name must not be empty".to_string()))?;
        let hostname = normalize_text_option(Some(hostname.into()))
            .ok_or_else(|| Error::Validation("endpoint hostname must not be empty".to_string()))?;

        let endpoint = Endpoint::new(name, hostname);
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).insert(&endpoint).await?;
        tracing::info!(endpoint = %endpoint.id, name = %endpoint.name, "endpoint registered");
        Ok(endpoint)
    }

    /// Fetch an active endpoint by id
    pub async fn get_endpoint(&self, id: &EndpointId) -> Result<Endpoint> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).get_active(id).await
    }

    /// List active endpoints
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).list().await
    }

    /// List a pool's active members
    pub async fn list_members(&self, pool_id: &PoolId) -> Result<Vec<Endpoint>> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).list_by_pool(pool_id).await
    }

    /// Assign an unassigned endpoint to a pool.
    ///
    /// An endpoint belongs to at most one pool; assigning an already
    /// assigned endpoint fails (use `move_endpoint`).
    pub async fn assign_endpoint(&self, endpoint_id: &EndpointId, pool_id: &PoolId) -> Result<()> {
        let db = self.db.lock().await;
        let endpoint = EndpointStore::new(db.connection()).get_active(endpoint_id).await?;
        if let Some(current) = endpoint.pool_id {
            return Err(Error::Validation(format!(
                "endpoint {endpoint_id} is already in pool {current}"
            )));
        }
        let pool = PoolStore::new(db.connection()).get_required(pool_id).await?;

        db.begin().await?;
        let result = self.place_endpoint_locked(&db, endpoint_id, &pool).await;
        match result {
            Ok(()) => {
                db.commit().await?;
                tracing::info!(endpoint = %endpoint_id, pool = %pool_id, "endpoint assigned");
                Ok(())
            }
            Err(error) => {
                db.rollback().await;
                Err(error)
            }
        }
    }

    /// Move an endpoint between pools atomically: no window where its
    /// status reflects the old pool's target
    pub async fn move_endpoint(
        &self,
        endpoint_id: &EndpointId,
        from_pool: &PoolId,
        to_pool: &PoolId,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let endpoint = EndpointStore::new(db.connection()).get_active(endpoint_id).await?;
        if endpoint.pool_id != Some(*from_pool) {
            return Err(Error::Validation(format!(
                "endpoint {endpoint_id} is not in pool {from_pool}"
            )));
        }
        let pool = PoolStore::new(db.connection()).get_required(to_pool).await?;

        db.begin().await?;
        let result = self.place_endpoint_locked(&db, endpoint_id, &pool).await;
        match result {
            Ok(()) => {
                db.commit().await?;
                tracing::info!(endpoint = %endpoint_id, from = %from_pool, to = %to_pool,
                    "endpoint moved");
                Ok(())
            }
            Err(error) => {
                db.rollback().await;
                Err(error)
            }
        }
    }

    /// Unassign and soft-remove an endpoint; snapshots referencing it
    /// are kept
    pub async fn remove_endpoint(&self, endpoint_id: &EndpointId) -> Result<()> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).soft_remove(endpoint_id).await?;
        tracing::info!(endpoint = %endpoint_id, "endpoint removed");
        Ok(())
    }

    /// Record a status report: bump `last_seen` and store the reported
    /// standing
    pub async fn record_heartbeat(&self, endpoint_id: &EndpointId, status: SyncStatus) -> Result<()> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection())
            .record_heartbeat(endpoint_id, unix_timestamp_ms(), status)
            .await
    }

    /// Overwrite an endpoint's sync status (used by the coordinator
    /// when finalizing operations)
    pub async fn set_endpoint_status(
        &self,
        endpoint_id: &EndpointId,
        status: SyncStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        EndpointStore::new(db.connection()).set_status(endpoint_id, status).await
    }

    /// Sweep endpoints that have been silent past the offline window
    pub async fn mark_stale_endpoints(&self) -> Result<Vec<StatusChange>> {
        let cutoff = unix_timestamp_ms() - self.offline_after_ms;
        let db = self.db.lock().await;
        let store = EndpointStore::new(db.connection());

        let mut changes = Vec::new();
        for endpoint in store.list_stale(cutoff).await? {
            store.set_status(&endpoint.id, SyncStatus::Offline).await?;
            tracing::warn!(endpoint = %endpoint.id, name = %endpoint.name,
                "endpoint missed heartbeat window, marking offline");
            changes.push(StatusChange {
                endpoint_id: endpoint.id,
                status: SyncStatus::Offline,
            });
        }
        Ok(changes)
    }

    /// Aggregate status for a pool
    pub async fn pool_status(&self, pool_id: &PoolId) -> Result<PoolStatus> {
        let db = self.db.lock().await;
        PoolStore::new(db.connection()).get_required(pool_id).await?;
        let members = EndpointStore::new(db.connection()).list_by_pool(pool_id).await?;
        let statuses = members
            .into_iter()
            .map(|member| (member.id, member.sync_status))
            .collect();
        Ok(PoolStatus::from_members(*pool_id, statuses))
    }

    /// Set membership and recompute status against the new pool's
    /// target; must run inside an open transaction
    async fn place_endpoint_locked(
        &self,
        db: &Database,
        endpoint_id: &EndpointId,
        pool: &Pool,
    ) -> Result<()> {
        let endpoints = EndpointStore::new(db.connection());
        endpoints.set_pool(endpoint_id, Some(&pool.id)).await?;

        let status = match pool.target_state_id {
            None => SyncStatus::Unknown,
            Some(target_id) => {
                let snapshots = SnapshotStore::new(db.connection());
                let target = snapshots.get_required(&target_id).await?;
                match snapshots.latest_for_endpoint(endpoint_id).await? {
                    Some(latest)
                        if SystemState::packages_equal(&latest.packages, &target.packages) =>
                    {
                        SyncStatus::InSync
                    }
                    _ => SyncStatus::Behind,
                }
            }
        };
        endpoints.set_status(endpoint_id, status).await
    }
}

fn validate_policy(policy: &SyncPolicy) -> Result<()> {
    for package in &policy.exclude_packages {
        if !is_valid_name(package) {
            return Err(Error::Validation(format!(
                "invalid package name in exclude list: {package}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OverallStatus, PackageEntry};

    async fn setup() -> (PoolManager, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().await.unwrap()));
        (PoolManager::new(db.clone(), 180_000), db)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_pool_rejects_empty_and_duplicate_names() {
        let (manager, _db) = setup().await;

        let err = manager.create_pool("   ", "", SyncPolicy::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let err = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn policy_with_bad_package_name_is_rejected() {
        let (manager, _db) = setup().await;

        let mut policy = SyncPolicy::default();
        policy.exclude_packages.insert("not a package".to_string());
        let err = manager.create_pool("office", "", policy).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_membership_is_enforced() {
        let (manager, _db) = setup().await;

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let lab = manager.create_pool("lab", "", SyncPolicy::default()).await.unwrap();
        let endpoint = manager.register_endpoint("ws1", "ws1.lan").await.unwrap();

        manager.assign_endpoint(&endpoint.id, &office.id).await.unwrap();
        let err = manager.assign_endpoint(&endpoint.id, &lab.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        manager.move_endpoint(&endpoint.id, &office.id, &lab.id).await.unwrap();
        let moved = manager.get_endpoint(&endpoint.id).await.unwrap();
        assert_eq!(moved.pool_id, Some(lab.id));
        assert!(manager.list_members(&office.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn move_requires_correct_source_pool() {
        let (manager, _db) = setup().await;

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let lab = manager.create_pool("lab", "", SyncPolicy::default()).await.unwrap();
        let endpoint = manager.register_endpoint("ws1", "ws1.lan").await.unwrap();
        manager.assign_endpoint(&endpoint.id, &office.id).await.unwrap();

        let err = manager
            .move_endpoint(&endpoint.id, &lab.id, &office.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_pool_unassigns_members() {
        let (manager, _db) = setup().await;

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let endpoint = manager.register_endpoint("ws1", "ws1.lan").await.unwrap();
        manager.assign_endpoint(&endpoint.id, &office.id).await.unwrap();

        manager.delete_pool(&office.id).await.unwrap();
        assert!(matches!(
            manager.get_pool(&office.id).await.unwrap_err(),
            Error::NotFound(_)
        ));

        let endpoint = manager.get_endpoint(&endpoint.id).await.unwrap();
        assert_eq!(endpoint.pool_id, None);
        assert_eq!(endpoint.sync_status, SyncStatus::Unknown);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_pool_renames_and_checks_uniqueness() {
        let (manager, _db) = setup().await;

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        manager.create_pool("lab", "", SyncPolicy::default()).await.unwrap();

        let err = manager
            .update_pool(
                &office.id,
                PoolUpdate {
                    name: Some("lab".to_string()),
                    ..PoolUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let renamed = manager
            .update_pool(
                &office.id,
                PoolUpdate {
                    name: Some("hq".to_string()),
                    description: Some("headquarters".to_string()),
                    ..PoolUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "hq");
        assert_eq!(renamed.description, "headquarters");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn assignment_against_target_computes_status() {
        let (manager, db) = setup().await;

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let e1 = manager.register_endpoint("e1", "e1.lan").await.unwrap();
        manager.assign_endpoint(&e1.id, &office.id).await.unwrap();

        // Give the pool a target via a snapshot from e1
        let packages = vec![PackageEntry {
            name: "foo".to_string(),
            version: "1.0".to_string(),
            repository: "core".to_string(),
            installed_size: 10,
            dependencies: Vec::new(),
        }];
        let state = crate::state::StateManager::new(db, 10)
            .snapshot_as_target(e1.id, office.id, "x86_64", "pacman 6.1.0", packages)
            .await
            .unwrap()
            .0;
        assert!(state.captured_at > 0);

        // A fresh endpoint with no snapshot joins behind
        let e2 = manager.register_endpoint("e2", "e2.lan").await.unwrap();
        manager.assign_endpoint(&e2.id, &office.id).await.unwrap();
        let joined = manager.get_endpoint(&e2.id).await.unwrap();
        assert_eq!(joined.sync_status, SyncStatus::Behind);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_sweep_marks_offline_and_degrades_pool() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().await.unwrap()));
        // Zero-width window: everything not reporting "now" is stale
        let manager = PoolManager::new(db.clone(), -1);

        let office = manager.create_pool("office", "", SyncPolicy::default()).await.unwrap();
        let endpoint = manager.register_endpoint("ws1", "ws1.lan").await.unwrap();
        manager.assign_endpoint(&endpoint.id, &office.id).await.unwrap();

        let changes = manager.mark_stale_endpoints().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, SyncStatus::Offline);

        let status = manager.pool_status(&office.id).await.unwrap();
        assert_eq!(status.overall_status, OverallStatus::Degraded);
        assert!(status.sync_percentage.abs() < f64::EPSILON);

        // Sweep is idempotent: already-offline endpoints are skipped
        assert!(manager.mark_stale_endpoints().await.unwrap().is_empty());
    }
}
