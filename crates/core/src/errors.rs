//! Error types for the personctl core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::hooks::HookPoint;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Terminal outcome of a failed add / update / delete.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another record already uses this login name.
    #[error("person with uid '{0}' already exists")]
    DuplicateIdentifier(String),

    /// Another record already uses this contact address.
    #[error("person with mail '{0}' already exists")]
    DuplicateContact(String),

    /// The draft is missing a required value or carries a malformed one.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// No record exists with the given inum.
    #[error("person not found: {0}")]
    NotFound(String),

    /// The organization does not allow person modification.
    #[error("person modification is not allowed")]
    ModificationNotAllowed,

    /// The directory store rejected the write.
    #[error("failed to persist person '{id}': {source}")]
    PersistenceError {
        id: String,
        #[source]
        source: StoreError,
    },

    /// The directory store failed to remove the record.
    #[error("failed to remove person '{id}': {source}")]
    DeletionFailed {
        id: String,
        #[source]
        source: StoreError,
    },

    /// A hook module returned an error.
    #[error("{point} hook failed: {source}")]
    HookFailed {
        point: HookPoint,
        #[source]
        source: HookError,
    },

    /// The edit session was already committed or aborted.
    #[error("edit session is closed")]
    SessionClosed,
}

impl From<ValidationError> for PipelineError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::DuplicateIdentifier(uid) => Self::DuplicateIdentifier(uid),
            ValidationError::DuplicateContact(mail) => Self::DuplicateContact(mail),
            ValidationError::Lookup { uid, source } => Self::PersistenceError { id: uid, source },
            other => Self::ValidationFailed(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Errors raised by [`RecordValidator`](crate::validator::RecordValidator).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("uid already exists: {0}")]
    DuplicateIdentifier(String),

    #[error("mail already exists: {0}")]
    DuplicateContact(String),

    /// A required field has no value.
    #[error("required field '{0}' is missing")]
    MissingField(String),

    /// A field value has the wrong shape.
    #[error("invalid value for '{field}': {detail}")]
    InvalidField { field: String, detail: String },

    /// Password and confirmation differ.
    #[error("password and confirm password should be same")]
    PasswordMismatch,

    /// The uniqueness lookup itself failed.
    #[error("uniqueness lookup for '{uid}' failed: {source}")]
    Lookup {
        uid: String,
        #[source]
        source: StoreError,
    },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the directory and device stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// A JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// The backing store is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Hook errors
// ---------------------------------------------------------------------------

/// Errors returned by hook modules.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook ran and reported failure.
    #[error("hook '{hook}' failed: {detail}")]
    Failed { hook: String, detail: String },

    /// The hook command could not be started.
    #[error("hook command not found: {0}")]
    CommandNotFound(String),

    /// The hook produced output that is not a person record.
    #[error("hook '{hook}' returned invalid output: {detail}")]
    InvalidOutput { hook: String, detail: String },

    /// Generic I/O error talking to the hook process.
    #[error("hook I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Device errors
// ---------------------------------------------------------------------------

/// Per-record failure to decode a stored device blob.
#[derive(Debug, Error)]
#[error("failed to decode device record '{record_id}': {source}")]
pub struct DeviceDecodeError {
    pub record_id: String,
    #[source]
    pub source: serde_json::Error,
}

/// Errors from the device binding store.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device with this id exists (for the given person, if any).
    #[error("device {0} not found")]
    NotFound(String),

    /// A single blob could not be decoded.
    #[error(transparent)]
    Decode(#[from] DeviceDecodeError),

    /// A device could not be encoded for storage.
    #[error("failed to encode device: {0}")]
    Encode(serde_json::Error),

    /// The underlying store failed.
    #[error("device store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
