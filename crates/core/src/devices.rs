//! Authentication devices bound to a person.
//!
//! Devices are stored as JSON blobs keyed by owner. Decoding happens per
//! record so one bad blob never hides the rest of a person's devices.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{DeviceDecodeError, DeviceError};
use crate::models::{BoundDevice, DeviceInfo, DeviceRecord};
use crate::store::DeviceStore;

/// Result of listing a person's devices.
#[derive(Debug, Default)]
pub struct DeviceListing {
    pub devices: Vec<BoundDevice>,
    /// Records whose blob could not be decoded.
    pub failures: Vec<DeviceDecodeError>,
}

impl DeviceListing {
    pub fn infos(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of [`DeviceBindingStore::remove_device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRemoval {
    Removed,
    NotFound,
    Failed(String),
}

impl DeviceRemoval {
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

#[derive(Clone)]
pub struct DeviceBindingStore {
    store: Arc<dyn DeviceStore>,
}

impl DeviceBindingStore {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Fetch and decode every device owned by `person_inum`.
    pub fn list_devices(&self, person_inum: &str) -> Result<DeviceListing, DeviceError> {
        let records = self.store.list_raw(person_inum)?;
        let mut listing = DeviceListing::default();

        for record in records {
            match decode(&record) {
                Ok(info) => listing.devices.push(BoundDevice {
                    record_id: record.id,
                    info,
                }),
                Err(e) => {
                    warn!(person_inum, record_id = %e.record_id, error = %e.source, "skipping undecodable device");
                    listing.failures.push(e);
                }
            }
        }

        debug!(
            person_inum,
            devices = listing.devices.len(),
            failures = listing.failures.len(),
            "listed devices"
        );
        Ok(listing)
    }

    /// Look up one device record. `person_inum = None` matches any owner.
    pub fn get_device(
        &self,
        person_inum: Option<&str>,
        record_id: &str,
    ) -> Result<Option<BoundDevice>, DeviceError> {
        let Some(record) = self.store.get_raw(person_inum, record_id)? else {
            return Ok(None);
        };
        let info = decode(&record)?;
        Ok(Some(BoundDevice {
            record_id: record.id,
            info,
        }))
    }

    pub fn require_device(
        &self,
        person_inum: Option<&str>,
        record_id: &str,
    ) -> Result<BoundDevice, DeviceError> {
        self.get_device(person_inum, record_id)?
            .ok_or_else(|| DeviceError::NotFound(record_id.to_string()))
    }

    /// Remove the device with `uuid` and drop it from `cache`.
    ///
    /// Never fails; errors are logged and reported as [`DeviceRemoval::Failed`].
    pub fn remove_device(
        &self,
        person_inum: &str,
        uuid: Uuid,
        cache: &mut Vec<DeviceInfo>,
    ) -> DeviceRemoval {
        let listing = match self.list_devices(person_inum) {
            Ok(listing) => listing,
            Err(e) => {
                error!(person_inum, %uuid, error = %e, "failed to list devices for removal");
                return DeviceRemoval::Failed(e.to_string());
            }
        };

        let targets: Vec<&BoundDevice> =
            listing.devices.iter().filter(|d| d.info.uuid == uuid).collect();
        if targets.is_empty() {
            debug!(person_inum, %uuid, "device to remove not found");
            return DeviceRemoval::NotFound;
        }

        let mut removed = 0;
        let mut last_error = None;
        for target in targets {
            match self.store.remove_raw(&target.record_id) {
                Ok(()) => removed += 1,
                Err(e) => {
                    error!(person_inum, %uuid, record_id = %target.record_id, error = %e, "failed to remove device");
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            Some(detail) if removed == 0 => DeviceRemoval::Failed(detail),
            _ => {
                cache.retain(|d| d.uuid != uuid);
                info!(person_inum, %uuid, removed, "removed device");
                DeviceRemoval::Removed
            }
        }
    }

    /// Remove every device record owned by `person_inum`, decodable or not.
    pub fn remove_all(&self, person_inum: &str) -> Result<usize, DeviceError> {
        let records = self.store.list_raw(person_inum)?;
        let mut removed = 0;
        for record in &records {
            self.store.remove_raw(&record.id)?;
            removed += 1;
        }
        if removed > 0 {
            info!(person_inum, removed, "removed all devices");
        }
        Ok(removed)
    }

    /// Persist `info` for `person_inum` and return the record id.
    pub fn register_device(&self, person_inum: &str, info: &DeviceInfo) -> Result<String, DeviceError> {
        let blob = serde_json::to_string(info).map_err(DeviceError::Encode)?;
        let record = self.store.put_raw(person_inum, &blob)?;
        info!(person_inum, uuid = %info.uuid, record_id = %record.id, "registered device");
        Ok(record.id)
    }

    /// Persist an opaque blob as-is. It is not decoded until listed.
    pub fn import_raw(&self, person_inum: &str, blob: &str) -> Result<String, DeviceError> {
        let record = self.store.put_raw(person_inum, blob)?;
        debug!(person_inum, record_id = %record.id, "imported raw device blob");
        Ok(record.id)
    }
}

fn decode(record: &DeviceRecord) -> Result<DeviceInfo, DeviceDecodeError> {
    serde_json::from_str(&record.device_data).map_err(|source| DeviceDecodeError {
        record_id: record.id.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> (Arc<Database>, DeviceBindingStore) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let store = DeviceBindingStore::new(db.clone());
        (db, store)
    }

    fn named(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: Some(name.into()),
            ..DeviceInfo::new()
        }
    }

    #[test]
    fn test_malformed_blob_does_not_break_listing() {
        let (_db, store) = setup();
        store.register_device("@!p1", &named("phone")).unwrap();
        let bad = store.import_raw("@!p1", "{not json").unwrap();
        store.register_device("@!p1", &named("tablet")).unwrap();

        let listing = store.list_devices("@!p1").unwrap();
        assert_eq!(listing.devices.len(), 2);
        assert_eq!(listing.failures.len(), 1);
        assert_eq!(listing.failures[0].record_id, bad);
        assert!(!listing.is_clean());
    }

    #[test]
    fn test_remove_unknown_uuid_leaves_others() {
        let (_db, store) = setup();
        store.register_device("@!p1", &named("phone")).unwrap();
        store.register_device("@!p1", &named("tablet")).unwrap();
        let mut cache = store.list_devices("@!p1").unwrap().infos();

        let outcome = store.remove_device("@!p1", Uuid::new_v4(), &mut cache);
        assert_eq!(outcome, DeviceRemoval::NotFound);
        assert!(!outcome.is_removed());
        assert_eq!(cache.len(), 2);
        assert_eq!(store.list_devices("@!p1").unwrap().devices.len(), 2);
    }

    #[test]
    fn test_remove_device_updates_store_and_cache() {
        let (_db, store) = setup();
        let phone = named("phone");
        store.register_device("@!p1", &phone).unwrap();
        store.register_device("@!p1", &named("tablet")).unwrap();
        let mut cache = store.list_devices("@!p1").unwrap().infos();

        assert!(store.remove_device("@!p1", phone.uuid, &mut cache).is_removed());
        assert_eq!(cache.len(), 1);
        assert!(cache.iter().all(|d| d.uuid != phone.uuid));
        assert_eq!(store.list_devices("@!p1").unwrap().devices.len(), 1);
    }

    #[test]
    fn test_remove_device_clears_every_record_with_uuid() {
        let (_db, store) = setup();
        let phone = named("phone");
        store.register_device("@!p1", &phone).unwrap();
        store.register_device("@!p1", &phone).unwrap();
        store.register_device("@!p1", &named("tablet")).unwrap();
        let mut cache = store.list_devices("@!p1").unwrap().infos();
        assert_eq!(cache.len(), 3);

        assert!(store.remove_device("@!p1", phone.uuid, &mut cache).is_removed());
        assert_eq!(cache.len(), 1);
        let left = store.list_devices("@!p1").unwrap();
        assert_eq!(left.devices.len(), 1);
        assert_eq!(left.devices[0].info.name.as_deref(), Some("tablet"));
    }

    #[test]
    fn test_remove_device_of_other_person_is_not_found() {
        let (_db, store) = setup();
        let phone = named("phone");
        store.register_device("@!p1", &phone).unwrap();
        let mut cache = Vec::new();
        assert_eq!(
            store.remove_device("@!p2", phone.uuid, &mut cache),
            DeviceRemoval::NotFound
        );
        assert_eq!(store.list_devices("@!p1").unwrap().devices.len(), 1);
    }

    #[test]
    fn test_get_and_require_device() {
        let (_db, store) = setup();
        let id = store.register_device("@!p1", &named("phone")).unwrap();

        assert!(store.get_device(Some("@!p1"), &id).unwrap().is_some());
        assert!(store.get_device(Some("@!p2"), &id).unwrap().is_none());
        assert_eq!(store.require_device(None, &id).unwrap().record_id, id);
        assert!(matches!(
            store.require_device(None, "missing"),
            Err(DeviceError::NotFound(_))
        ));

        let bad = store.import_raw("@!p1", "[]").unwrap();
        assert!(matches!(
            store.get_device(None, &bad),
            Err(DeviceError::Decode(_))
        ));
    }

    #[test]
    fn test_remove_all_includes_undecodable() {
        let (_db, store) = setup();
        store.register_device("@!p1", &named("phone")).unwrap();
        store.import_raw("@!p1", "garbage").unwrap();
        store.register_device("@!p2", &named("other")).unwrap();

        assert_eq!(store.remove_all("@!p1").unwrap(), 2);
        assert!(store.list_devices("@!p1").unwrap().devices.is_empty());
        assert_eq!(store.list_devices("@!p2").unwrap().devices.len(), 1);
    }
}
