//! Endpoint storage

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Endpoint, EndpointId, PoolId, SyncStatus};

/// Store for endpoint rows
pub struct EndpointStore<'a> {
    conn: &'a Connection,
}

impl<'a> EndpointStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a newly registered endpoint
    pub async fn insert(&self, endpoint: &Endpoint) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO endpoints (id, name, hostname, pool_id, last_seen, sync_status, is_removed)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    endpoint.id.as_str(),
                    endpoint.name.clone(),
                    endpoint.hostname.clone(),
                    endpoint.pool_id.map(|id| id.as_str()),
                    endpoint.last_seen,
                    endpoint.sync_status.as_str(),
                    i32::from(endpoint.is_removed),
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetch an endpoint by id, including soft-removed ones
    pub async fn get(&self, id: &EndpointId) -> Result<Option<Endpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, hostname, pool_id, last_seen, sync_status, is_removed
                 FROM endpoints WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_endpoint(&row)?)),
            None => Ok(None),
        }
    }

    /// Fetch an active (not soft-removed) endpoint or fail with `NotFound`
    pub async fn get_active(&self, id: &EndpointId) -> Result<Endpoint> {
        match self.get(id).await? {
            Some(endpoint) if !endpoint.is_removed => Ok(endpoint),
            _ => Err(Error::NotFound(format!("endpoint {id}"))),
        }
    }

    /// List active endpoints, registration order
    pub async fn list(&self) -> Result<Vec<Endpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, hostname, pool_id, last_seen, sync_status, is_removed
                 FROM endpoints WHERE is_removed = 0 ORDER BY id",
                (),
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(parse_endpoint(&row)?);
        }
        Ok(endpoints)
    }

    /// List active members of a pool, membership (registration) order
    pub async fn list_by_pool(&self, pool_id: &PoolId) -> Result<Vec<Endpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, hostname, pool_id, last_seen, sync_status, is_removed
                 FROM endpoints WHERE pool_id = ? AND is_removed = 0 ORDER BY id",
                params![pool_id.as_str()],
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(parse_endpoint(&row)?);
        }
        Ok(endpoints)
    }

    /// Update an endpoint's sync status
    pub async fn set_status(&self, id: &EndpointId, status: SyncStatus) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE endpoints SET sync_status = ? WHERE id = ? AND is_removed = 0",
                params![status.as_str(), id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("endpoint {id}")));
        }
        Ok(())
    }

    /// Record a heartbeat: bump `last_seen` and set the given status
    pub async fn record_heartbeat(
        &self,
        id: &EndpointId,
        last_seen: i64,
        status: SyncStatus,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE endpoints SET last_seen = ?, sync_status = ? WHERE id = ? AND is_removed = 0",
                params![last_seen, status.as_str(), id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("endpoint {id}")));
        }
        Ok(())
    }

    /// Set or clear an endpoint's pool membership
    pub async fn set_pool(&self, id: &EndpointId, pool_id: Option<&PoolId>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE endpoints SET pool_id = ? WHERE id = ? AND is_removed = 0",
                params![pool_id.map(PoolId::as_str), id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("endpoint {id}")));
        }
        Ok(())
    }

    /// Unassign every member of a pool (used by pool deletion)
    pub async fn unassign_pool(&self, pool_id: &PoolId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE endpoints SET pool_id = NULL, sync_status = 'unknown' WHERE pool_id = ?",
                params![pool_id.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Soft-remove an endpoint; history referencing it stays intact
    pub async fn soft_remove(&self, id: &EndpointId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE endpoints SET is_removed = 1, pool_id = NULL WHERE id = ? AND is_removed = 0",
                params![id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("endpoint {id}")));
        }
        Ok(())
    }

    /// Active endpoints whose `last_seen` is older than the cutoff and
    /// that are not already offline
    pub async fn list_stale(&self, cutoff_ms: i64) -> Result<Vec<Endpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, hostname, pool_id, last_seen, sync_status, is_removed
                 FROM endpoints
                 WHERE is_removed = 0 AND last_seen < ? AND sync_status != 'offline'",
                params![cutoff_ms],
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(parse_endpoint(&row)?);
        }
        Ok(endpoints)
    }
}

fn parse_endpoint(row: &Row) -> Result<Endpoint> {
    let id: String = row.get(0)?;
    let pool_id: Option<String> = row.get(3)?;
    let sync_status: String = row.get(5)?;

    Ok(Endpoint {
        id: id
            .parse()
            .map_err(|_| Error::Storage(format!("invalid endpoint id: {id}")))?,
        name: row.get(1)?,
        hostname: row.get(2)?,
        pool_id: pool_id
            .map(|raw| {
                raw.parse()
                    .map_err(|_| Error::Storage(format!("invalid pool id: {raw}")))
            })
            .transpose()?,
        last_seen: row.get(4)?,
        sync_status: sync_status.parse().map_err(Error::Storage)?,
        is_removed: row.get::<i32>(6)? != 0,
    })
}
