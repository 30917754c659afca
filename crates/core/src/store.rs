//! Collaborator interfaces the pipeline is written against.
//!
//! [`Database`](crate::db::Database) implements both stores; tests plug in
//! their own implementations to simulate outages.

use crate::errors::StoreError;
use crate::models::{DeviceRecord, PersonRecord};

/// Directory holding person entries.
pub trait DirectoryStore: Send + Sync {
    /// Look up a person by login name (case-insensitive).
    fn find_by_login(&self, uid: &str) -> Result<Option<PersonRecord>, StoreError>;

    /// Look up a person by contact address (case-insensitive).
    fn find_by_contact(&self, mail: &str) -> Result<Option<PersonRecord>, StoreError>;

    fn find_by_id(&self, inum: &str) -> Result<Option<PersonRecord>, StoreError>;

    /// Persist a new person. `inum` must already be assigned.
    fn create(&self, person: &PersonRecord) -> Result<(), StoreError>;

    /// Overwrite an existing person. A `None` password keeps the stored one.
    fn update(&self, person: &PersonRecord) -> Result<(), StoreError>;

    fn delete(&self, person: &PersonRecord) -> Result<(), StoreError>;

    /// A fresh inum not used by any stored person.
    fn generate_id(&self) -> Result<String, StoreError>;

    /// Internal name for a new person with login `uid`.
    fn generate_display_name(&self, uid: &str) -> String;

    /// Storage location for `inum`.
    fn resolve_location(&self, inum: &str) -> String;
}

/// Raw device blob storage keyed by person and device id.
pub trait DeviceStore: Send + Sync {
    fn list_raw(&self, person_inum: &str) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Fetch one device row. `person_inum = None` matches any owner.
    fn get_raw(
        &self,
        person_inum: Option<&str>,
        id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Store a blob for a person and return the new row.
    fn put_raw(&self, person_inum: &str, device_data: &str) -> Result<DeviceRecord, StoreError>;

    fn remove_raw(&self, id: &str) -> Result<(), StoreError>;
}

/// Organization-level switch for person modification.
pub trait ModificationPolicy: Send + Sync {
    fn is_person_modification_allowed(&self) -> bool;
}
