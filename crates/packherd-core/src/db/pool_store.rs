//! Pool storage

use std::collections::BTreeSet;

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Pool, PoolId, SnapshotId, SyncPolicy};

/// Store for pool rows
pub struct PoolStore<'a> {
    conn: &'a Connection,
}

impl<'a> PoolStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new pool
    pub async fn insert(&self, pool: &Pool) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pools (id, name, description, target_state_id, auto_sync,
                 exclude_packages, include_aur, conflict_resolution, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    pool.id.as_str(),
                    pool.name.clone(),
                    pool.description.clone(),
                    pool.target_state_id.map(|id| id.as_str()),
                    i32::from(pool.policy.auto_sync),
                    serde_json::to_string(&pool.policy.exclude_packages)?,
                    i32::from(pool.policy.include_aur),
                    pool.policy.conflict_resolution.as_str(),
                    pool.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetch a pool by id
    pub async fn get(&self, id: &PoolId) -> Result<Option<Pool>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, target_state_id, auto_sync, exclude_packages,
                 include_aur, conflict_resolution, created_at
                 FROM pools WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_pool(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch a pool by id or fail with `NotFound`
    pub async fn get_required(&self, id: &PoolId) -> Result<Pool> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pool {id}")))
    }

    /// Fetch a pool by its unique name
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Pool>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, target_state_id, auto_sync, exclude_packages,
                 include_aur, conflict_resolution, created_at
                 FROM pools WHERE name = ?",
                params![name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_pool(&row)?)),
            None => Ok(None),
        }
    }

    /// List pools, creation order
    pub async fn list(&self) -> Result<Vec<Pool>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, target_state_id, auto_sync, exclude_packages,
                 include_aur, conflict_resolution, created_at
                 FROM pools ORDER BY id",
                (),
            )
            .await?;

        let mut pools = Vec::new();
        while let Some(row) = rows.next().await? {
            pools.push(parse_pool(&row)?);
        }
        Ok(pools)
    }

    /// Update a pool's name, description, and policy
    pub async fn update(&self, pool: &Pool) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pools SET name = ?, description = ?, auto_sync = ?, exclude_packages = ?,
                 include_aur = ?, conflict_resolution = ? WHERE id = ?",
                params![
                    pool.name.clone(),
                    pool.description.clone(),
                    i32::from(pool.policy.auto_sync),
                    serde_json::to_string(&pool.policy.exclude_packages)?,
                    i32::from(pool.policy.include_aur),
                    pool.policy.conflict_resolution.as_str(),
                    pool.id.as_str(),
                ],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("pool {}", pool.id)));
        }
        Ok(())
    }

    /// Point the pool at a new target snapshot
    pub async fn set_target(&self, id: &PoolId, snapshot_id: &SnapshotId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pools SET target_state_id = ? WHERE id = ?",
                params![snapshot_id.as_str(), id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("pool {id}")));
        }
        Ok(())
    }

    /// Delete a pool row (membership cleanup is the caller's job)
    pub async fn delete(&self, id: &PoolId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM pools WHERE id = ?", params![id.as_str()])
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("pool {id}")));
        }
        Ok(())
    }

    /// Snapshot ids currently referenced as any pool's target
    pub async fn target_snapshot_ids(&self) -> Result<Vec<SnapshotId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT target_state_id FROM pools WHERE target_state_id IS NOT NULL",
                (),
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(0)?;
            ids.push(
                raw.parse()
                    .map_err(|_| Error::Storage(format!("invalid snapshot id: {raw}")))?,
            );
        }
        Ok(ids)
    }
}

fn parse_pool(row: &Row) -> Result<Pool> {
    let id: String = row.get(0)?;
    let target: Option<String> = row.get(3)?;
    let exclude_raw: String = row.get(5)?;
    let resolution: String = row.get(7)?;

    let exclude_packages: BTreeSet<String> = serde_json::from_str(&exclude_raw)?;

    Ok(Pool {
        id: id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid pool id: {id}")))?,
        name: row.get(1)?,
        description: row.get(2)?,
        target_state_id: target
            .map(|raw| {
                raw.parse()
                    .map_err(|_| Error::Storage(format!("invalid snapshot id: {raw}")))
            })
            .transpose()?,
        policy: SyncPolicy {
            auto_sync: row.get::<i32>(4)? != 0,
            exclude_packages,
            include_aur: row.get::<i32>(6)? != 0,
            conflict_resolution: resolution.parse().map_err(Error::Storage)?,
        },
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ConflictResolution;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn sample_pool() -> Pool {
        let mut policy = SyncPolicy::default();
        policy.exclude_packages.insert("nvidia-dkms".to_string());
        policy.conflict_resolution = ConflictResolution::Newest;
        Pool::new("workstations", "office machines", policy)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_and_get_roundtrip() {
        let db = setup().await;
        let store = PoolStore::new(db.connection());

        let pool = sample_pool();
        store.insert(&pool).await.unwrap();

        let fetched = store.get(&pool.id).await.unwrap().unwrap();
        assert_eq!(fetched, pool);

        let by_name = store.get_by_name("workstations").await.unwrap().unwrap();
        assert_eq!(by_name.id, pool.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_name_is_rejected_by_schema() {
        let db = setup().await;
        let store = PoolStore::new(db.connection());

        store.insert(&sample_pool()).await.unwrap();
        assert!(store.insert(&sample_pool()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn target_state_update_roundtrip() {
        let db = setup().await;
        let store = PoolStore::new(db.connection());

        let pool = sample_pool();
        store.insert(&pool).await.unwrap();

        let snapshot_id = SnapshotId::new();
        store.set_target(&pool.id, &snapshot_id).await.unwrap();

        let fetched = store.get(&pool.id).await.unwrap().unwrap();
        assert_eq!(fetched.target_state_id, Some(snapshot_id));

        let targets = store.target_snapshot_ids().await.unwrap();
        assert_eq!(targets, vec![snapshot_id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_missing_pool_is_not_found() {
        let db = setup().await;
        let store = PoolStore::new(db.connection());

        let err = store.delete(&PoolId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
