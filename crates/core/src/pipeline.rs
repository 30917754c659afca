//! Person mutation pipeline.
//!
//! The [`IdentityMutationPipeline`] drives every add, update and delete:
//!
//! 1. Check the organization's modification policy.
//! 2. Validate (create only) and merge custom attributes.
//! 3. Run pre hooks on a private candidate copy.
//! 4. Write to the directory store.
//! 5. Run post hooks.
//!
//! Nothing is rolled back. A failing pre hook means nothing was written; a
//! failing post hook leaves the write in place and is reported as
//! [`PipelineError::HookFailed`].
//!
//! Interactive callers use an [`EditSession`], opened with
//! [`start_add`](IdentityMutationPipeline::start_add) or
//! [`start_update`](IdentityMutationPipeline::start_update) and closed with
//! [`commit`](IdentityMutationPipeline::commit) or
//! [`abort`](IdentityMutationPipeline::abort).

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{AttributeCatalog, ConfigCatalog, PersonSchema};
use crate::config::{AppConfig, PersonConfig};
use crate::db::Database;
use crate::devices::{DeviceBindingStore, DeviceRemoval};
use crate::errors::PipelineError;
use crate::hooks::{CommandHookModule, DeviceCleanupHook, ExternalHookRunner, HookPoint};
use crate::merger::CustomAttributeMerger;
use crate::models::{CustomAttribute, DeviceInfo, PersonRecord, PersonStatus};
use crate::store::{DirectoryStore, ModificationPolicy};
use crate::validator::{validate_password_confirmation, RecordValidator};

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// Target state of an update. Start from [`PersonEdits::from_record`] and
/// change what should differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEdits {
    pub uid: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub mail: Option<String>,
    pub status: PersonStatus,
    pub attributes: Vec<CustomAttribute>,
    pub object_classes: Vec<String>,
    pub external_uids: Vec<String>,
    /// New password. `None` keeps the stored one.
    pub password: Option<String>,
}

impl PersonEdits {
    pub fn from_record(person: &PersonRecord) -> Self {
        Self {
            uid: person.uid.clone(),
            display_name: person.display_name.clone(),
            given_name: person.given_name.clone(),
            mail: person.mail.clone(),
            status: person.status,
            attributes: person.custom_attributes.clone(),
            object_classes: person.object_classes.clone(),
            external_uids: person.external_uids.clone(),
            password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Edit sessions
// ---------------------------------------------------------------------------

/// Whether a session creates a new person or edits an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Add,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Committed,
    Aborted,
}

/// Working state of one add or update, owned by the caller.
#[derive(Debug)]
pub struct EditSession {
    mode: SessionMode,
    state: SessionState,
    /// Person being edited. Custom attributes and status are taken from
    /// `attributes` and `status` on commit.
    pub person: PersonRecord,
    /// Session attribute list, filtered to the schema for existing people.
    pub attributes: Vec<CustomAttribute>,
    pub status: PersonStatus,
    original: Option<PersonRecord>,
    password: Option<String>,
    confirm: Option<String>,
    devices: Vec<DeviceInfo>,
    device_failures: usize,
    schema: PersonSchema,
}

impl EditSession {
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn schema(&self) -> &PersonSchema {
        &self.schema
    }

    /// The stored record an update session started from.
    pub fn original(&self) -> Option<&PersonRecord> {
        self.original.as_ref()
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    pub fn confirm_password(&mut self, confirm: impl Into<String>) {
        self.confirm = Some(confirm.into());
    }

    /// Providers of the person's external-auth bindings, deduplicated.
    pub fn external_auth_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = Vec::new();
        for binding in self.person.external_bindings() {
            if !providers.contains(&binding.provider) {
                providers.push(binding.provider);
            }
        }
        providers
    }

    /// Drop every binding of `provider`. Returns how many were removed.
    pub fn remove_external_auth(&mut self, provider: &str) -> usize {
        let before = self.person.external_uids.len();
        self.person
            .external_uids
            .retain(|raw| crate::models::ExternalAuthBinding::parse(raw).provider != provider);
        let removed = before - self.person.external_uids.len();
        debug!(provider, removed, "removed external auth bindings");
        removed
    }

    /// Devices loaded when the session started, minus removed ones.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Number of device records that could not be decoded.
    pub fn device_failures(&self) -> usize {
        self.device_failures
    }

    fn checked_password(&self) -> Result<Option<String>, PipelineError> {
        match &self.password {
            Some(password) => {
                validate_password_confirmation(password, self.confirm.as_deref().unwrap_or(""))?;
                Ok(Some(password.clone()))
            }
            None => Ok(None),
        }
    }

    fn draft(&self) -> Result<PersonRecord, PipelineError> {
        let mut draft = self.person.clone();
        draft.custom_attributes = self.attributes.clone();
        draft.status = self.status;
        draft.password = self.checked_password()?;
        Ok(draft)
    }

    fn edits(&self) -> Result<PersonEdits, PipelineError> {
        let mut edits = PersonEdits::from_record(&self.person);
        edits.attributes = self.attributes.clone();
        edits.status = self.status;
        edits.password = self.checked_password()?;
        Ok(edits)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct IdentityMutationPipeline {
    directory: Arc<dyn DirectoryStore>,
    catalog: Arc<dyn AttributeCatalog>,
    devices: DeviceBindingStore,
    hooks: ExternalHookRunner,
    policy: Arc<dyn ModificationPolicy>,
    config: PersonConfig,
}

impl IdentityMutationPipeline {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        catalog: Arc<dyn AttributeCatalog>,
        devices: DeviceBindingStore,
        hooks: ExternalHookRunner,
        policy: Arc<dyn ModificationPolicy>,
        config: PersonConfig,
    ) -> Self {
        Self {
            directory,
            catalog,
            devices,
            hooks,
            policy,
            config,
        }
    }

    /// Wire a pipeline over a SQLite database using the application config.
    ///
    /// Registers the device cascade first, then the command hook if one is
    /// configured.
    pub fn from_database(db: Arc<Database>, config: &AppConfig) -> Self {
        let devices = DeviceBindingStore::new(db.clone());
        let mut hooks = ExternalHookRunner::new();
        hooks.register(Box::new(DeviceCleanupHook::new(
            devices.clone(),
            config.hooks.cascade_devices_on_delete,
        )));
        if let Some(command) = CommandHookModule::from_config(&config.hooks) {
            hooks.register(Box::new(command));
        }

        Self::new(
            db,
            Arc::new(ConfigCatalog::from_config(&config.person)),
            devices,
            hooks,
            Arc::new(config.person.clone()),
            config.person.clone(),
        )
    }

    pub fn devices(&self) -> &DeviceBindingStore {
        &self.devices
    }

    pub fn directory(&self) -> &dyn DirectoryStore {
        self.directory.as_ref()
    }

    pub fn hooks(&self) -> &ExternalHookRunner {
        &self.hooks
    }

    // -- add ----------------------------------------------------------------

    /// Create a person from `draft`. The draft itself is never modified.
    pub fn add(&self, draft: &PersonRecord) -> Result<PersonRecord, PipelineError> {
        self.check_policy()?;

        let mandatory = self.catalog.list_mandatory();
        RecordValidator::new(self.directory.as_ref(), &mandatory).validate_for_create(draft)?;

        let mut candidate = draft.clone();
        candidate.uid = draft.uid.trim().to_string();
        candidate.object_classes =
            CustomAttributeMerger::normalize_object_classes(&self.config.object_classes, draft)
                .into_iter()
                .collect();
        CustomAttributeMerger::apply_status(&mut candidate.custom_attributes, candidate.status);
        CustomAttributeMerger::sync_contact_email(&mut candidate);
        CustomAttributeMerger::ensure_common_name(&mut candidate);

        let inum = self
            .directory
            .generate_id()
            .map_err(|source| PipelineError::PersistenceError {
                id: candidate.uid.clone(),
                source,
            })?;
        candidate.inum = Some(inum.clone());
        candidate.iname = Some(self.directory.generate_display_name(&candidate.uid));
        candidate.dn = Some(self.directory.resolve_location(&inum));

        self.run_pre_hook(HookPoint::PreCreate, &mut candidate)?;

        self.directory
            .create(&candidate)
            .map_err(|source| PipelineError::PersistenceError {
                id: inum.clone(),
                source,
            })?;
        candidate.password = None;
        info!(inum = %inum, uid = %candidate.uid, "person created");

        self.run_post_hook(HookPoint::PostCreate, &mut candidate)?;
        Ok(candidate)
    }

    // -- update -------------------------------------------------------------

    /// Apply `edits` to `existing`. `existing` is never modified and its
    /// `inum` is kept whatever the hooks do.
    pub fn update(
        &self,
        existing: &PersonRecord,
        edits: PersonEdits,
    ) -> Result<PersonRecord, PipelineError> {
        self.check_policy()?;
        let inum = existing
            .inum
            .clone()
            .ok_or_else(|| PipelineError::NotFound(existing.uid.clone()))?;

        let mut candidate = existing.clone();
        candidate.object_classes = edits.object_classes;
        candidate.object_classes =
            CustomAttributeMerger::normalize_object_classes(&self.config.object_classes, &candidate)
                .into_iter()
                .collect();

        let removed = CustomAttributeMerger::detect_removed(&edits.attributes, &existing.custom_attributes);
        if !removed.is_empty() {
            debug!(inum = %inum, restored = removed.len(), "keeping attributes missing from edit");
        }
        candidate.custom_attributes = CustomAttributeMerger::reconcile(&edits.attributes, &removed);

        candidate.uid = edits.uid.trim().to_string();
        candidate.display_name = edits.display_name;
        candidate.given_name = edits.given_name;
        candidate.mail = edits.mail;
        candidate.status = edits.status;
        candidate.external_uids = edits.external_uids;
        candidate.password = edits.password;
        CustomAttributeMerger::apply_status(&mut candidate.custom_attributes, candidate.status);
        CustomAttributeMerger::sync_contact_email(&mut candidate);

        self.check_changed_identity(existing, &candidate)?;

        self.run_pre_hook(HookPoint::PreUpdate, &mut candidate)?;

        self.directory
            .update(&candidate)
            .map_err(|source| PipelineError::PersistenceError {
                id: inum.clone(),
                source,
            })?;
        candidate.password = None;
        info!(inum = %inum, uid = %candidate.uid, "person updated");

        self.run_post_hook(HookPoint::PostUpdate, &mut candidate)?;
        Ok(candidate)
    }

    /// Warn about login or contact changes and recheck them when configured.
    fn check_changed_identity(
        &self,
        existing: &PersonRecord,
        candidate: &PersonRecord,
    ) -> Result<(), PipelineError> {
        let inum = existing.id();
        let recheck = self.config.recheck_uniqueness_on_update;

        if !candidate.uid.eq_ignore_ascii_case(&existing.uid) {
            warn!(inum, from = %existing.uid, to = %candidate.uid, recheck, "login name changed on update");
            if recheck {
                let other = self
                    .directory
                    .find_by_login(&candidate.uid)
                    .map_err(|source| PipelineError::PersistenceError {
                        id: inum.to_string(),
                        source,
                    })?;
                if other.is_some_and(|p| p.id() != inum) {
                    return Err(PipelineError::DuplicateIdentifier(candidate.uid.clone()));
                }
            }
        }

        let old_mail = existing.mail.as_deref().unwrap_or("");
        let new_mail = candidate.mail.as_deref().unwrap_or("");
        if !new_mail.eq_ignore_ascii_case(old_mail) {
            warn!(inum, from = old_mail, to = new_mail, recheck, "contact address changed on update");
            if recheck && !new_mail.trim().is_empty() {
                let other = self
                    .directory
                    .find_by_contact(new_mail.trim())
                    .map_err(|source| PipelineError::PersistenceError {
                        id: inum.to_string(),
                        source,
                    })?;
                if other.is_some_and(|p| p.id() != inum) {
                    return Err(PipelineError::DuplicateContact(new_mail.trim().to_string()));
                }
            }
        }
        Ok(())
    }

    // -- delete -------------------------------------------------------------

    pub fn delete(&self, existing: &PersonRecord) -> Result<(), PipelineError> {
        self.check_policy()?;
        let inum = existing
            .inum
            .clone()
            .ok_or_else(|| PipelineError::NotFound(existing.uid.clone()))?;

        let mut target = existing.clone();
        self.run_pre_hook(HookPoint::PreDelete, &mut target)?;

        self.directory
            .delete(&target)
            .map_err(|source| PipelineError::DeletionFailed {
                id: inum.clone(),
                source,
            })?;
        info!(inum = %inum, uid = %target.uid, "person deleted");

        self.run_post_hook(HookPoint::PostDelete, &mut target)
    }

    // -- sessions -----------------------------------------------------------

    /// Open a session for a new person.
    pub fn start_add(&self) -> Result<EditSession, PipelineError> {
        self.check_policy()?;
        let schema = PersonSchema::resolve(self.catalog.as_ref(), &self.config);

        let mut person = PersonRecord::default();
        self.run_hook(HookPoint::NewRecord, &mut person)?;
        person.inum = None;

        let attributes =
            CustomAttributeMerger::init_session_attributes(&schema, &person.custom_attributes, true);
        debug!(attributes = attributes.len(), "add session started");
        Ok(EditSession {
            mode: SessionMode::Add,
            state: SessionState::Open,
            status: person.status,
            person,
            attributes,
            original: None,
            password: None,
            confirm: None,
            devices: Vec::new(),
            device_failures: 0,
            schema,
        })
    }

    /// Open a session for the stored person `inum`.
    pub fn start_update(&self, inum: &str) -> Result<EditSession, PipelineError> {
        self.check_policy()?;
        let person = self
            .directory
            .find_by_id(inum)
            .map_err(|source| PipelineError::PersistenceError {
                id: inum.to_string(),
                source,
            })?
            .ok_or_else(|| PipelineError::NotFound(inum.to_string()))?;
        let schema = PersonSchema::resolve(self.catalog.as_ref(), &self.config);
        let attributes =
            CustomAttributeMerger::init_session_attributes(&schema, &person.custom_attributes, false);

        let (devices, device_failures) = match self.devices.list_devices(inum) {
            Ok(listing) => (listing.infos(), listing.failures.len()),
            Err(e) => {
                warn!(inum, error = %e, "failed to load devices for session");
                (Vec::new(), 0)
            }
        };

        debug!(inum, uid = %person.uid, devices = devices.len(), "update session started");
        Ok(EditSession {
            mode: SessionMode::Update,
            state: SessionState::Open,
            status: person.status,
            attributes,
            original: Some(person.clone()),
            person,
            password: None,
            confirm: None,
            devices,
            device_failures,
            schema,
        })
    }

    /// Remove a device of the session's person from the store and the
    /// session cache.
    pub fn remove_session_device(&self, session: &mut EditSession, uuid: Uuid) -> DeviceRemoval {
        let Some(inum) = session.original.as_ref().and_then(|p| p.inum.clone()) else {
            return DeviceRemoval::NotFound;
        };
        self.devices.remove_device(&inum, uuid, &mut session.devices)
    }

    /// Run the session's add or update. A failed commit leaves the session
    /// open so the caller can correct it and retry.
    pub fn commit(&self, session: &mut EditSession) -> Result<PersonRecord, PipelineError> {
        if !session.is_open() {
            return Err(PipelineError::SessionClosed);
        }

        let saved = match session.mode {
            SessionMode::Add => self.add(&session.draft()?)?,
            SessionMode::Update => {
                let original = session
                    .original
                    .as_ref()
                    .ok_or_else(|| PipelineError::NotFound(session.person.uid.clone()))?;
                self.update(original, session.edits()?)?
            }
        };

        session.state = SessionState::Committed;
        session.person = saved.clone();
        session.password = None;
        session.confirm = None;
        Ok(saved)
    }

    pub fn abort(&self, session: &mut EditSession) -> Result<(), PipelineError> {
        if !session.is_open() {
            return Err(PipelineError::SessionClosed);
        }
        session.state = SessionState::Aborted;
        session.password = None;
        session.confirm = None;
        debug!(uid = %session.person.uid, "edit session aborted");
        Ok(())
    }

    // -- helpers ------------------------------------------------------------

    fn check_policy(&self) -> Result<(), PipelineError> {
        if self.policy.is_person_modification_allowed() {
            Ok(())
        } else {
            warn!("person modification rejected by policy");
            Err(PipelineError::ModificationNotAllowed)
        }
    }

    fn run_hook(&self, point: HookPoint, person: &mut PersonRecord) -> Result<(), PipelineError> {
        self.hooks
            .run_if_enabled(point, person)
            .map_err(|source| PipelineError::HookFailed { point, source })
    }

    /// Run a pre hook, then put back the identifiers assigned on create.
    fn run_pre_hook(&self, point: HookPoint, person: &mut PersonRecord) -> Result<(), PipelineError> {
        let inum = person.inum.clone();
        let iname = person.iname.clone();
        let dn = person.dn.clone();

        self.run_hook(point, person)?;

        if person.inum != inum || person.iname != iname || person.dn != dn {
            warn!(inum = ?inum, point = %point, "hook changed assigned identifiers, restoring them");
            person.inum = inum;
            person.iname = iname;
            person.dn = dn;
        }
        Ok(())
    }

    /// Post hooks run after the write; a failure does not undo it.
    fn run_post_hook(&self, point: HookPoint, person: &mut PersonRecord) -> Result<(), PipelineError> {
        self.run_hook(point, person).map_err(|e| {
            error!(inum = person.id(), point = %point, error = %e, "mutation was persisted but post hook failed");
            e
        })
    }
}
