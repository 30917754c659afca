//! SQLite persistence layer for personctl.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and the person / device / audit queries. `Database`
//! implements both [`DirectoryStore`](crate::store::DirectoryStore) and
//! [`DeviceStore`](crate::store::DeviceStore).

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::DirectoryConfig;
use crate::errors::StoreError;

/// Identifier generation and password settings of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySettings {
    pub base_dn: String,
    pub org_inum: String,
    pub org_iname: String,
    pub password_cost: u32,
}

impl DirectorySettings {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            base_dn: config.base_dn.clone(),
            org_inum: config.org_inum.clone(),
            org_iname: config.org_iname.clone(),
            password_cost: config.password_cost,
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self::from_config(&DirectoryConfig::default())
    }
}

/// Main database handle wrapping a SQLite connection.
///
/// The inner connection is wrapped in a `Mutex` so that `Database` is
/// `Send + Sync`, enabling use inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
    settings: DirectorySettings,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
            settings: DirectorySettings::default(),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            settings: DirectorySettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: DirectorySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DirectorySettings {
        &self.settings
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), StoreError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("people.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), StoreError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO audit_log (action, inum, details, success, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params!["probe", "@!1", "rollback", "2025-01-01T00:00:00Z"],
            )?;
            Err(StoreError::Unavailable("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = DirectoryConfig::default();
        config.base_dn = "o=acme".into();
        config.password_cost = 4;
        let db = Database::in_memory()
            .unwrap()
            .with_settings(DirectorySettings::from_config(&config));
        assert_eq!(db.settings().base_dn, "o=acme");
        assert_eq!(db.settings().password_cost, 4);
    }
}
