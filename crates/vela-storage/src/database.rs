// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! A [`Database`] wraps one `tokio_rusqlite::Connection`. Every closure
//! passed to [`tokio_rusqlite::Connection::call`] runs on that connection's
//! single background thread, so the handle is the ledger's single writer.
//! Clone the handle to share it; do not open a second connection for writes.

use std::path::Path;

use tracing::{debug, info};
use vela_config::model::StorageConfig;
use vela_core::VelaError;

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into [`VelaError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> VelaError {
    VelaError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the SQLite database holding the usage ledger.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if needed) a file database with WAL enabled.
    pub async fn open(path: &str) -> Result<Self, VelaError> {
        Self::open_with(path, true).await
    }

    /// Open the database described by the storage configuration.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, VelaError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    /// Open a private in-memory database, migrated and ready.
    pub async fn open_in_memory() -> Result<Self, VelaError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;
        Self::prepare(conn, false).await
    }

    async fn open_with(path: &str, wal_mode: bool) -> Result<Self, VelaError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| VelaError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;
        let db = Self::prepare(conn, wal_mode).await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    async fn prepare(conn: tokio_rusqlite::Connection, wal_mode: bool) -> Result<Self, VelaError> {
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        let applied = conn
            .call(|conn| run_migrations(conn))
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Error(inner) => inner,
                other => VelaError::Storage {
                    source: other.to_string().into(),
                },
            })?;
        debug!(applied, "migrations complete");

        Ok(Self { conn })
    }

    /// The underlying connection, for query modules in other crates.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Round-trips a trivial query through the writer thread.
    pub async fn health_check(&self) -> Result<(), VelaError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoints the WAL so the main file is self-contained.
    pub async fn checkpoint(&self) -> Result<(), VelaError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_names(db: &Database) -> Vec<String> {
        db.connection()
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' \
                     AND name NOT LIKE 'refinery%' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn in_memory_database_is_migrated() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(
            table_names(&db).await,
            vec!["spend_daily", "spend_monthly", "usage_ledger"]
        );
        db.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_file_database_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/vela.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.checkpoint().await.unwrap();
        drop(db);

        let db = Database::open(path).await.unwrap();
        assert_eq!(table_names(&db).await.len(), 3);
    }

    #[tokio::test]
    async fn ledger_rows_are_immutable() {
        let db = Database::open_in_memory().await.unwrap();
        let result = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO usage_ledger (id, tier, backend_id, category, confidence, \
                     outcome, created_at) VALUES ('a', 'fast_local', 'm', 'c', 0.5, \
                     'completed', '2026-01-01T00:00:00.000Z')",
                    [],
                )?;
                conn.execute("UPDATE usage_ledger SET cost_usd = 9 WHERE id = 'a'", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
