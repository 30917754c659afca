//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS people (
            inum              TEXT PRIMARY KEY,
            iname             TEXT,
            dn                TEXT,
            uid               TEXT NOT NULL COLLATE NOCASE,
            display_name      TEXT,
            given_name        TEXT,
            mail              TEXT COLLATE NOCASE,
            status            TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
            custom_attributes TEXT NOT NULL DEFAULT '[]',
            object_classes    TEXT NOT NULL DEFAULT '[]',
            external_uids     TEXT NOT NULL DEFAULT '[]',
            user_password     TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_people_uid ON people (uid);
        CREATE INDEX IF NOT EXISTS idx_people_mail ON people (mail);

        CREATE TABLE IF NOT EXISTS fido_devices (
            id           TEXT PRIMARY KEY,
            person_inum  TEXT NOT NULL,
            device_data  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fido_devices_person ON fido_devices (person_inum);

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            inum        TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_inum ON audit_log (inum);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
