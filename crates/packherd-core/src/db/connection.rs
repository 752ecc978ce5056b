//! Database connection management

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use crate::error::Result;

use super::migrations;

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it
    /// doesn't exist. Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for a long-lived service workload
    async fn configure(&self) -> Result<()> {
        // WAL is a no-op for :memory: databases; ignore pragma failures there
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin an explicit transaction
    pub async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    /// Commit the current transaction
    pub async fn commit(&self) -> Result<()> {
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    /// Roll back the current transaction, ignoring failures (the
    /// connection may already be out of the transaction)
    pub async fn rollback(&self) {
        self.conn.execute("ROLLBACK", ()).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn open_in_memory_migrates() {
        let db = Database::open_in_memory().await.unwrap();

        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('endpoints','pools','snapshots','operations')",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_on_disk_creates_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("herd.db");

        let _db = Database::open(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transaction_rollback_discards_writes() {
        let db = Database::open_in_memory().await.unwrap();

        db.begin().await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO pools (id, name, description, target_state_id, auto_sync,
                 exclude_packages, include_aur, conflict_resolution, created_at)
                 VALUES ('x', 'tmp', '', NULL, 0, '[]', 0, 'manual', 0)",
                (),
            )
            .await
            .unwrap();
        db.rollback().await;

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM pools", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 0);
    }
}
