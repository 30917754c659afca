//! Extension hooks around person mutations.
//!
//! The [`ExternalHookRunner`] dispatches each [`HookPoint`] to every enabled
//! [`HookModule`] in registration order and stops at the first failure.

pub mod command;
pub mod devices;

use tracing::{debug, warn};

use crate::errors::HookError;
use crate::models::PersonRecord;

pub use command::CommandHookModule;
pub use devices::DeviceCleanupHook;

/// Lifecycle events a hook module can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// A fresh record was initialized for an add session.
    NewRecord,
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl HookPoint {
    pub const ALL: [HookPoint; 7] = [
        Self::NewRecord,
        Self::PreCreate,
        Self::PostCreate,
        Self::PreUpdate,
        Self::PostUpdate,
        Self::PreDelete,
        Self::PostDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewRecord => "new-record",
            Self::PreCreate => "pre-create",
            Self::PostCreate => "post-create",
            Self::PreUpdate => "pre-update",
            Self::PostUpdate => "post-update",
            Self::PreDelete => "pre-delete",
            Self::PostDelete => "post-delete",
        }
    }

    /// Whether modules may change the record at this point.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::NewRecord | Self::PreCreate | Self::PreUpdate | Self::PreDelete
        )
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An optional extension invoked around mutation events.
///
/// Every callback defaults to a no-op so modules only implement the points
/// they care about.
pub trait HookModule: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    fn on_new_record(&self, _person: &mut PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_create(&self, _person: &mut PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn post_create(&self, _person: &PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_update(&self, _person: &mut PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn post_update(&self, _person: &PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_delete(&self, _person: &mut PersonRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn post_delete(&self, _person: &PersonRecord) -> Result<(), HookError> {
        Ok(())
    }
}

/// Ordered set of hook modules.
#[derive(Default)]
pub struct ExternalHookRunner {
    modules: Vec<Box<dyn HookModule>>,
}

impl ExternalHookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn HookModule>) {
        debug!(module = module.name(), "registered hook module");
        self.modules.push(module);
    }

    pub fn with_module(mut self, module: Box<dyn HookModule>) -> Self {
        self.register(module);
        self
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Names of modules that are currently enabled.
    pub fn enabled_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.is_enabled())
            .map(|m| m.name())
            .collect()
    }

    /// Run `point` on every enabled module. The first error aborts the run.
    pub fn run_if_enabled(
        &self,
        point: HookPoint,
        person: &mut PersonRecord,
    ) -> Result<(), HookError> {
        for module in self.modules.iter().filter(|m| m.is_enabled()) {
            debug!(module = module.name(), point = %point, uid = %person.uid, "running hook");
            let result = match point {
                HookPoint::NewRecord => module.on_new_record(person),
                HookPoint::PreCreate => module.pre_create(person),
                HookPoint::PostCreate => module.post_create(person),
                HookPoint::PreUpdate => module.pre_update(person),
                HookPoint::PostUpdate => module.post_update(person),
                HookPoint::PreDelete => module.pre_delete(person),
                HookPoint::PostDelete => module.post_delete(person),
            };
            if let Err(e) = result {
                warn!(module = module.name(), point = %point, error = %e, "hook failed");
                return Err(e);
            }
        }
        Ok(())
    }
}
