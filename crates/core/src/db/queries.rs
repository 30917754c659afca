//! Typed query helpers for every table in the personctl database, and the
//! store trait implementations built on them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Database;
use crate::errors::StoreError;
use crate::models::{AuditEntry, DeviceRecord, PersonRecord, PersonStatus};
use crate::store::{DeviceStore, DirectoryStore};

/// Attempts at drawing an unused inum before giving up.
const MAX_ID_ATTEMPTS: usize = 16;

const PERSON_COLUMNS: &str = "inum, iname, dn, uid, display_name, given_name, mail, status, \
     custom_attributes, object_classes, external_uids";

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub inum: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

/// A raw row from the `people` table, JSON columns still encoded.
struct PersonRow {
    inum: String,
    iname: Option<String>,
    dn: Option<String>,
    uid: String,
    display_name: Option<String>,
    given_name: Option<String>,
    mail: Option<String>,
    status: String,
    custom_attributes: String,
    object_classes: String,
    external_uids: String,
}

impl PersonRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            inum: row.get(0)?,
            iname: row.get(1)?,
            dn: row.get(2)?,
            uid: row.get(3)?,
            display_name: row.get(4)?,
            given_name: row.get(5)?,
            mail: row.get(6)?,
            status: row.get(7)?,
            custom_attributes: row.get(8)?,
            object_classes: row.get(9)?,
            external_uids: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<PersonRecord, StoreError> {
        Ok(PersonRecord {
            inum: Some(self.inum),
            iname: self.iname,
            dn: self.dn,
            uid: self.uid,
            display_name: self.display_name,
            given_name: self.given_name,
            mail: self.mail,
            status: PersonStatus::from_str_val(&self.status).unwrap_or_default(),
            custom_attributes: serde_json::from_str(&self.custom_attributes)?,
            object_classes: serde_json::from_str(&self.object_classes)?,
            external_uids: serde_json::from_str(&self.external_uids)?,
            password: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- people -------------------------------------------------------------

    fn query_person(&self, column: &str, value: &str) -> Result<Option<PersonRecord>, StoreError> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM people WHERE {column} = ?1 LIMIT 1");
        let row = {
            let conn = self.conn();
            conn.query_row(&sql, params![value], PersonRow::from_row)
                .optional()?
        };
        row.map(PersonRow::into_record).transpose()
    }

    /// List people ordered by login name.
    pub fn list_people(&self, limit: u32) -> Result<Vec<PersonRecord>, StoreError> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERSON_COLUMNS} FROM people ORDER BY uid LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit], PersonRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(PersonRow::into_record).collect()
    }

    pub fn count_people(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
        Ok(count)
    }

    fn person_exists(&self, inum: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM people WHERE inum = ?1",
            params![inum],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check `candidate` against the stored password hash of `inum`.
    ///
    /// Returns `false` when the person has no password set.
    pub fn verify_password(&self, inum: &str, candidate: &str) -> Result<bool, StoreError> {
        let hash: Option<String> = {
            let conn = self.conn();
            conn.query_row(
                "SELECT user_password FROM people WHERE inum = ?1",
                params![inum],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "person".into(),
                id: inum.to_string(),
            })?
        };
        match hash {
            Some(hash) => {
                bcrypt::verify(candidate, &hash).map_err(|e| StoreError::PasswordHash(e.to_string()))
            }
            None => Ok(false),
        }
    }

    fn hash_password(&self, password: Option<&str>) -> Result<Option<String>, StoreError> {
        password
            .map(|p| {
                bcrypt::hash(p, self.settings.password_cost)
                    .map_err(|e| StoreError::PasswordHash(e.to_string()))
            })
            .transpose()
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry outside of any other write.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, StoreError> {
        let conn = self.conn();
        insert_audit(&conn, entry)
    }

    /// List recent audit-log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, inum, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    inum: row.get(2)?,
                    details: row.get(3)?,
                    success: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_audit_log(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Store trait implementations
// ---------------------------------------------------------------------------

impl DirectoryStore for Database {
    fn find_by_login(&self, uid: &str) -> Result<Option<PersonRecord>, StoreError> {
        self.query_person("uid", uid)
    }

    fn find_by_contact(&self, mail: &str) -> Result<Option<PersonRecord>, StoreError> {
        self.query_person("mail", mail)
    }

    fn find_by_id(&self, inum: &str) -> Result<Option<PersonRecord>, StoreError> {
        self.query_person("inum", inum)
    }

    fn create(&self, person: &PersonRecord) -> Result<(), StoreError> {
        let inum = person.inum.clone().ok_or_else(|| StoreError::NotFound {
            entity: "inum".into(),
            id: person.uid.clone(),
        })?;
        let password = self.hash_password(person.password.as_deref())?;
        let attributes = serde_json::to_string(&person.custom_attributes)?;
        let classes = serde_json::to_string(&person.object_classes)?;
        let external = serde_json::to_string(&person.external_uids)?;
        let now = Utc::now().to_rfc3339();

        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO people (inum, iname, dn, uid, display_name, given_name, mail, status,
                                     custom_attributes, object_classes, external_uids, user_password,
                                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    inum,
                    person.iname,
                    person.dn,
                    person.uid,
                    person.display_name,
                    person.given_name,
                    person.mail,
                    person.status.as_str(),
                    attributes,
                    classes,
                    external,
                    password,
                    now,
                ],
            )
            .map_err(|e| conflict_or(e, &person.uid))?;
            insert_audit(
                conn,
                &AuditEntry::success("person.create", Some(&inum), &format!("uid={}", person.uid)),
            )?;
            Ok(())
        })?;
        debug!(inum = %inum, uid = %person.uid, "inserted person");
        Ok(())
    }

    fn update(&self, person: &PersonRecord) -> Result<(), StoreError> {
        let inum = person.id().to_string();
        let password = self.hash_password(person.password.as_deref())?;
        let attributes = serde_json::to_string(&person.custom_attributes)?;
        let classes = serde_json::to_string(&person.object_classes)?;
        let external = serde_json::to_string(&person.external_uids)?;
        let now = Utc::now().to_rfc3339();

        self.transaction(|conn| {
            let changed = conn
                .execute(
                    "UPDATE people SET iname = ?2, dn = ?3, uid = ?4, display_name = ?5,
                            given_name = ?6, mail = ?7, status = ?8, custom_attributes = ?9,
                            object_classes = ?10, external_uids = ?11,
                            user_password = COALESCE(?12, user_password), updated_at = ?13
                     WHERE inum = ?1",
                    params![
                        inum,
                        person.iname,
                        person.dn,
                        person.uid,
                        person.display_name,
                        person.given_name,
                        person.mail,
                        person.status.as_str(),
                        attributes,
                        classes,
                        external,
                        password,
                        now,
                    ],
                )
                .map_err(|e| conflict_or(e, &person.uid))?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "person".into(),
                    id: inum.clone(),
                });
            }
            let details = if password.is_some() {
                format!("uid={} password changed", person.uid)
            } else {
                format!("uid={}", person.uid)
            };
            insert_audit(conn, &AuditEntry::success("person.update", Some(&inum), &details))?;
            Ok(())
        })?;
        debug!(inum = %inum, uid = %person.uid, "updated person");
        Ok(())
    }

    fn delete(&self, person: &PersonRecord) -> Result<(), StoreError> {
        let inum = person.id().to_string();
        self.transaction(|conn| {
            let changed = conn.execute("DELETE FROM people WHERE inum = ?1", params![inum])?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "person".into(),
                    id: inum.clone(),
                });
            }
            insert_audit(
                conn,
                &AuditEntry::success("person.delete", Some(&inum), &format!("uid={}", person.uid)),
            )?;
            Ok(())
        })?;
        debug!(inum = %inum, "deleted person");
        Ok(())
    }

    fn generate_id(&self) -> Result<String, StoreError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let hex = Uuid::new_v4().simple().to_string().to_uppercase();
            let candidate = format!("{}!0000!{}.{}", self.settings.org_inum, &hex[0..4], &hex[4..8]);
            if !self.person_exists(&candidate)? {
                return Ok(candidate);
            }
            warn!(candidate = %candidate, "generated inum already in use, retrying");
        }
        Err(StoreError::Unavailable(format!(
            "no unused inum found after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    fn generate_display_name(&self, uid: &str) -> String {
        format!("{}*person*{}", self.settings.org_iname, uid)
    }

    fn resolve_location(&self, inum: &str) -> String {
        format!("inum={},ou=people,{}", inum, self.settings.base_dn)
    }
}

impl DeviceStore for Database {
    fn list_raw(&self, person_inum: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, person_inum, device_data, created_at
             FROM fido_devices WHERE person_inum = ?1 ORDER BY created_at, id",
        )?;
        let devices = stmt
            .query_map(params![person_inum], device_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    fn get_raw(
        &self,
        person_inum: Option<&str>,
        id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let conn = self.conn();
        let device = match person_inum {
            Some(owner) => conn
                .query_row(
                    "SELECT id, person_inum, device_data, created_at
                     FROM fido_devices WHERE id = ?1 AND person_inum = ?2",
                    params![id, owner],
                    device_from_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT id, person_inum, device_data, created_at
                     FROM fido_devices WHERE id = ?1",
                    params![id],
                    device_from_row,
                )
                .optional()?,
        };
        Ok(device)
    }

    fn put_raw(&self, person_inum: &str, device_data: &str) -> Result<DeviceRecord, StoreError> {
        let record = DeviceRecord {
            id: Uuid::new_v4().to_string(),
            person_inum: person_inum.to_string(),
            device_data: device_data.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO fido_devices (id, person_inum, device_data, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.person_inum,
                record.device_data,
                record.created_at.to_rfc3339()
            ],
        )?;
        debug!(id = %record.id, person_inum, "inserted device record");
        Ok(record)
    }

    fn remove_raw(&self, id: &str) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT person_inum FROM fido_devices WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner) = owner else {
                return Err(StoreError::NotFound {
                    entity: "device".into(),
                    id: id.to_string(),
                });
            };
            conn.execute("DELETE FROM fido_devices WHERE id = ?1", params![id])?;
            insert_audit(
                conn,
                &AuditEntry::success("device.remove", Some(&owner), &format!("device={id}")),
            )?;
            Ok(())
        })?;
        debug!(id, "removed device record");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO audit_log (action, inum, details, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.action,
            entry.inum,
            entry.details,
            entry.success,
            entry.timestamp.to_rfc3339()
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, action = %entry.action, "inserted audit_log entry");
    Ok(id)
}

fn device_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    let created_at: String = row.get(3)?;
    Ok(DeviceRecord {
        id: row.get(0)?,
        person_inum: row.get(1)?,
        device_data: row.get(2)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Map a unique-constraint violation to `AlreadyExists`.
fn conflict_or(err: rusqlite::Error, uid: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::AlreadyExists {
                entity: "person".into(),
                id: uid.to_string(),
            }
        }
        other => other.into(),
    }
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DirectorySettings;
    use crate::models::CustomAttribute;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap().with_settings(DirectorySettings {
            password_cost: 4,
            ..DirectorySettings::default()
        });
        db.initialize().unwrap();
        db
    }

    fn stored_person(db: &Database, uid: &str, mail: &str) -> PersonRecord {
        let mut person = PersonRecord::new(uid);
        person.inum = Some(db.generate_id().unwrap());
        person.mail = Some(mail.into());
        person.custom_attributes = vec![CustomAttribute::new("sn", "Doe")];
        person.object_classes = vec!["gluuPerson".into()];
        person.external_uids = vec!["google:123".into()];
        db.create(&person).unwrap();
        person
    }

    #[test]
    fn test_person_crud() {
        let db = setup_db();
        let person = stored_person(&db, "jdoe", "jdoe@example.com");

        let found = db.find_by_login("JDOE").unwrap().unwrap();
        assert_eq!(found, person);
        assert!(db.find_by_contact("JDoe@Example.com").unwrap().is_some());
        assert!(db.find_by_id(person.id()).unwrap().is_some());

        let mut edited = found.clone();
        edited.display_name = Some("John Doe".into());
        db.update(&edited).unwrap();
        assert_eq!(
            db.find_by_id(person.id()).unwrap().unwrap().display_name.as_deref(),
            Some("John Doe")
        );

        db.delete(&edited).unwrap();
        assert!(db.find_by_id(person.id()).unwrap().is_none());
        assert_eq!(db.count_people().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_uid_is_already_exists() {
        let db = setup_db();
        stored_person(&db, "jdoe", "a@example.com");
        let mut dup = PersonRecord::new("JDoe");
        dup.inum = Some(db.generate_id().unwrap());
        let err = db.create(&dup).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_update_and_delete_missing_person() {
        let db = setup_db();
        let mut ghost = PersonRecord::new("ghost");
        ghost.inum = Some("@!none".into());
        assert!(matches!(db.update(&ghost), Err(StoreError::NotFound { .. })));
        assert!(matches!(db.delete(&ghost), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_password_is_hashed_and_kept_on_update() {
        let db = setup_db();
        let mut person = PersonRecord::new("jdoe");
        person.inum = Some(db.generate_id().unwrap());
        person.password = Some("s3cret".into());
        db.create(&person).unwrap();

        let stored: String = db
            .conn()
            .query_row(
                "SELECT user_password FROM people WHERE inum = ?1",
                params![person.id()],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(stored, "s3cret");
        assert!(db.verify_password(person.id(), "s3cret").unwrap());

        person.password = None;
        person.display_name = Some("J".into());
        db.update(&person).unwrap();
        assert!(db.verify_password(person.id(), "s3cret").unwrap());
        assert!(!db.verify_password(person.id(), "other").unwrap());
    }

    #[test]
    fn test_generated_identifiers() {
        let db = setup_db();
        let inum = db.generate_id().unwrap();
        assert!(inum.starts_with("@!1111!0000!"));
        assert_eq!(inum.len(), "@!1111!0000!".len() + 9);
        assert_eq!(db.generate_display_name("jdoe"), "@!1111*person*jdoe");
        assert_eq!(db.resolve_location("@!1"), "inum=@!1,ou=people,o=gluu");
    }

    #[test]
    fn test_device_rows() {
        let db = setup_db();
        let a = db.put_raw("@!p1", r#"{"uuid":"x"}"#).unwrap();
        db.put_raw("@!p2", "{}").unwrap();

        assert_eq!(db.list_raw("@!p1").unwrap().len(), 1);
        assert!(db.get_raw(Some("@!p1"), &a.id).unwrap().is_some());
        assert!(db.get_raw(Some("@!p2"), &a.id).unwrap().is_none());
        assert!(db.get_raw(None, &a.id).unwrap().is_some());

        db.remove_raw(&a.id).unwrap();
        assert!(db.list_raw("@!p1").unwrap().is_empty());
        assert!(matches!(db.remove_raw(&a.id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_audit_log_records_writes() {
        let db = setup_db();
        let person = stored_person(&db, "jdoe", "a@example.com");
        db.delete(&person).unwrap();

        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "person.delete");
        assert_eq!(entries[1].action, "person.create");
        assert!(entries.iter().all(|e| e.success));
        assert_eq!(db.count_audit_log().unwrap(), 2);
    }
}
