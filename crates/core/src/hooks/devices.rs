//! Cascade device removal after a person is deleted.

use tracing::{error, info};

use super::HookModule;
use crate::devices::DeviceBindingStore;
use crate::errors::HookError;
use crate::models::PersonRecord;

pub struct DeviceCleanupHook {
    devices: DeviceBindingStore,
    enabled: bool,
}

impl DeviceCleanupHook {
    pub fn new(devices: DeviceBindingStore, enabled: bool) -> Self {
        Self { devices, enabled }
    }
}

impl HookModule for DeviceCleanupHook {
    fn name(&self) -> &str {
        "device-cleanup"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn post_delete(&self, person: &PersonRecord) -> Result<(), HookError> {
        let inum = person.id();
        match self.devices.remove_all(inum) {
            Ok(removed) => {
                info!(inum, removed, "removed devices of deleted person");
                Ok(())
            }
            Err(e) => {
                error!(inum, error = %e, "failed to remove devices of deleted person, records may be orphaned");
                Err(HookError::Failed {
                    hook: self.name().to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::DeviceInfo;
    use std::sync::Arc;

    #[test]
    fn test_post_delete_removes_devices() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let devices = DeviceBindingStore::new(db.clone());
        devices.register_device("@!p1", &DeviceInfo::new()).unwrap();
        devices.register_device("@!p1", &DeviceInfo::new()).unwrap();

        let hook = DeviceCleanupHook::new(devices.clone(), true);
        let mut person = PersonRecord::new("jdoe");
        person.inum = Some("@!p1".into());
        hook.post_delete(&person).unwrap();

        assert!(devices.list_devices("@!p1").unwrap().devices.is_empty());
    }

    #[test]
    fn test_store_failure_surfaces() {
        let db = Arc::new(Database::in_memory().unwrap());
        // No schema: every query fails.
        let hook = DeviceCleanupHook::new(DeviceBindingStore::new(db), true);
        let mut person = PersonRecord::new("jdoe");
        person.inum = Some("@!p1".into());
        let err = hook.post_delete(&person).unwrap_err();
        assert!(matches!(err, HookError::Failed { ref hook, .. } if hook == "device-cleanup"));
    }
}
