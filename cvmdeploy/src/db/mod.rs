//! Database layer for cvmdeploy.
//!
//! Records the outcome of every deployment run so that `list` and `delete`
//! can find the resources a deployment created.
//!
//! Uses JSON blob pattern for flexibility with queryable columns for performance.

mod deployments;
mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use cvmdeploy_shared::errors::{DeployError, DeployResult};

pub use deployments::{
    DeploymentRecord, DeploymentStatus, DeploymentStore, FailedAttempt, VmRecord,
};
#[cfg(test)]
pub(crate) use deployments::test_record;

/// Helper macro to convert rusqlite errors to DeployError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| DeployError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores
/// wrap this to provide their APIs (e.g., `DeploymentStore`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> DeployResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // WAL, fsync per commit, wait up to 30s on another writer.
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=30000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn init_schema(conn: &Connection) -> DeployResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::warn!(
                    "Database schema version {} is older than current {}. Migrations not yet implemented.",
                    v,
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(DeployError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade cvmdeploy.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("db").join("cvmdeploy.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_db_reopen_keeps_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        drop(Database::open(&db_path).unwrap());

        let db = Database::open(&db_path).unwrap();
        let version: i32 = db
            .conn()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_db_rejects_newer_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        {
            let db = Database::open(&db_path).unwrap();
            db.conn()
                .execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
                .unwrap();
        }
        assert!(matches!(
            Database::open(&db_path),
            Err(DeployError::Database(_))
        ));
    }
}
