//! Database migrations

use libsql::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch; run each statement inside one
    // transaction
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Pools
        "CREATE TABLE IF NOT EXISTS pools (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            target_state_id TEXT,
            auto_sync INTEGER NOT NULL DEFAULT 0,
            exclude_packages TEXT NOT NULL DEFAULT '[]',
            include_aur INTEGER NOT NULL DEFAULT 0,
            conflict_resolution TEXT NOT NULL DEFAULT 'manual',
            created_at INTEGER NOT NULL
        )",
        // Endpoints; pool membership is an id relation, not a FK with
        // cascade, so pool deletion can unassign members explicitly
        "CREATE TABLE IF NOT EXISTS endpoints (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            hostname TEXT NOT NULL,
            pool_id TEXT,
            last_seen INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'unknown',
            is_removed INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_endpoints_pool ON endpoints(pool_id)",
        "CREATE INDEX IF NOT EXISTS idx_endpoints_last_seen ON endpoints(last_seen DESC)",
        // Immutable system-state snapshots; packages stored as JSON
        "CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            endpoint_id TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            architecture TEXT NOT NULL,
            pacman_version TEXT NOT NULL,
            packages TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_endpoint
            ON snapshots(endpoint_id, captured_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_pool ON snapshots(pool_id)",
        // Sync operations; detail payload stored as JSON
        "CREATE TABLE IF NOT EXISTS operations (
            id TEXT PRIMARY KEY,
            pool_id TEXT NOT NULL,
            endpoint_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            detail TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_operations_endpoint
            ON operations(endpoint_id, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_reach_current_version() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_are_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
