//! Sync operation storage

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{EndpointId, OperationId, SyncOperation};

/// Store for sync operation rows
pub struct OperationStore<'a> {
    conn: &'a Connection,
}

impl<'a> OperationStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a newly accepted operation
    pub async fn insert(&self, operation: &SyncOperation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO operations (id, pool_id, endpoint_id, kind, status, detail,
                 created_at, completed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    operation.id.as_str(),
                    operation.pool_id.as_str(),
                    operation.endpoint_id.as_str(),
                    operation.kind.as_str(),
                    operation.status.as_str(),
                    serde_json::to_string(&operation.detail)?,
                    operation.created_at,
                    operation.completed_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetch an operation by id
    pub async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pool_id, endpoint_id, kind, status, detail, created_at, completed_at
                 FROM operations WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch an operation by id or fail with `NotFound`
    pub async fn get_required(&self, id: &OperationId) -> Result<SyncOperation> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))
    }

    /// Persist a lifecycle transition together with its detail payload
    pub async fn update(&self, operation: &SyncOperation) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET status = ?, detail = ?, completed_at = ? WHERE id = ?",
                params![
                    operation.status.as_str(),
                    serde_json::to_string(&operation.detail)?,
                    operation.completed_at,
                    operation.id.as_str(),
                ],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("operation {}", operation.id)));
        }
        Ok(())
    }

    /// List an endpoint's operations, newest first
    pub async fn list_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
        let mut rows = self
            .conn
            .query(
                "SELECT id, pool_id, endpoint_id, kind, status, detail, created_at, completed_at
                 FROM operations WHERE endpoint_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
                params![endpoint_id.as_str(), limit as i64],
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(parse_operation(&row)?);
        }
        Ok(operations)
    }

    /// Active (pending/in-progress) operation for an endpoint, if any.
    ///
    /// Used to rebuild the coordinator's lock table after a restart.
    pub async fn active_for_endpoint(
        &self,
        endpoint_id: &EndpointId,
    ) -> Result<Option<SyncOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pool_id, endpoint_id, kind, status, detail, created_at, completed_at
                 FROM operations
                 WHERE endpoint_id = ? AND status IN ('pending', 'in_progress')
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                params![endpoint_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    /// All active operations, submission order
    pub async fn list_active(&self) -> Result<Vec<SyncOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pool_id, endpoint_id, kind, status, detail, created_at, completed_at
                 FROM operations WHERE status IN ('pending', 'in_progress')
                 ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(parse_operation(&row)?);
        }
        Ok(operations)
    }
}

fn parse_operation(row: &Row) -> Result<SyncOperation> {
    let id: String = row.get(0)?;
    let pool_id: String = row.get(1)?;
    let endpoint_id: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let status: String = row.get(4)?;
    let detail_raw: String = row.get(5)?;

    Ok(SyncOperation {
        id: id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid operation id: {id}")))?,
        pool_id: pool_id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid pool id: {pool_id}")))?,
        endpoint_id: endpoint_id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid endpoint id: {endpoint_id}")))?,
        kind: kind.parse().map_err(Error::Storage)?,
        status: status.parse().map_err(Error::Storage)?,
        detail: serde_json::from_str(&detail_raw)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{OperationKind, PackageAction, PoolId};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_and_get_roundtrip() {
        let db = setup().await;
        let store = OperationStore::new(db.connection());

        let mut operation =
            SyncOperation::new(PoolId::new(), EndpointId::new(), OperationKind::SyncToLatest);
        operation.detail.plan.push(PackageAction::install("foo", "1.0"));
        store.insert(&operation).await.unwrap();

        let fetched = store.get(&operation.id).await.unwrap().unwrap();
        assert_eq!(fetched, operation);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_persists_transition() {
        let db = setup().await;
        let store = OperationStore::new(db.connection());

        let mut operation =
            SyncOperation::new(PoolId::new(), EndpointId::new(), OperationKind::SetAsLatest);
        store.insert(&operation).await.unwrap();

        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(operation.created_at + 500);
        store.update(&operation).await.unwrap();

        let fetched = store.get(&operation.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OperationStatus::Completed);
        assert_eq!(fetched.completed_at, operation.completed_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn active_lookup_ignores_terminal_operations() {
        let db = setup().await;
        let store = OperationStore::new(db.connection());
        let endpoint_id = EndpointId::new();

        let mut done = SyncOperation::new(PoolId::new(), endpoint_id, OperationKind::SyncToLatest);
        done.status = OperationStatus::Completed;
        store.insert(&done).await.unwrap();

        assert!(store.active_for_endpoint(&endpoint_id).await.unwrap().is_none());

        let pending = SyncOperation::new(PoolId::new(), endpoint_id, OperationKind::SyncToLatest);
        store.insert(&pending).await.unwrap();

        let active = store.active_for_endpoint(&endpoint_id).await.unwrap().unwrap();
        assert_eq!(active.id, pending.id);
    }
}
