//! TOML-based configuration system for personctl.
//!
//! The file has four sections: `[directory]` (storage and id generation),
//! `[person]` (object classes, attribute catalog, modification policy),
//! `[hooks]` (external hook module) and `[logging]`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{AttributeDef, UserRole};
use crate::errors::ConfigError;
use crate::store::ModificationPolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory storage and identifier generation.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Person schema and mutation policy.
    #[serde(default)]
    pub person: PersonConfig,

    /// External hook module.
    #[serde(default)]
    pub hooks: HookConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Storage settings for the person directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Suffix under which person entries are located.
    #[serde(default = "default_base_dn")]
    pub base_dn: String,

    /// Organization inum used as the prefix of generated person inums.
    #[serde(default = "default_org_inum")]
    pub org_inum: String,

    /// Organization iname used as the prefix of generated inames.
    #[serde(default = "default_org_iname")]
    pub org_iname: String,

    /// bcrypt cost for stored passwords (4..=31).
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,
}

fn default_database() -> PathBuf {
    PathBuf::from("/var/lib/personctl/people.db")
}
fn default_base_dn() -> String {
    "o=gluu".into()
}
fn default_org_inum() -> String {
    "@!1111".into()
}
fn default_org_iname() -> String {
    "@!1111".into()
}
fn default_password_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            base_dn: default_base_dn(),
            org_inum: default_org_inum(),
            org_iname: default_org_iname(),
            password_cost: default_password_cost(),
        }
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// Person schema and mutation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonConfig {
    /// Object classes every person entry carries.
    #[serde(default = "default_object_classes")]
    pub object_classes: Vec<String>,

    /// Display names, parallel to `object_classes`.
    #[serde(default)]
    pub object_class_display_names: Vec<String>,

    /// Whether add / update / delete are permitted at all.
    #[serde(default = "default_true")]
    pub allow_modification: bool,

    /// Re-run uid / mail uniqueness checks when an update changes them.
    #[serde(default)]
    pub recheck_uniqueness_on_update: bool,

    /// Role whose attribute view edit sessions use.
    #[serde(default)]
    pub role: UserRole,

    /// Attribute catalog.
    #[serde(default = "default_attributes")]
    pub attributes: Vec<AttributeDef>,
}

fn default_object_classes() -> Vec<String> {
    vec!["gluuPerson".into(), "gluuCustomPerson".into()]
}
fn default_true() -> bool {
    true
}

/// Attributes known out of the box.
pub fn default_attributes() -> Vec<AttributeDef> {
    vec![
        AttributeDef::required("uid", "Username", "gluuPerson"),
        AttributeDef::required("givenName", "First Name", "gluuPerson"),
        AttributeDef::required("sn", "Last Name", "gluuPerson"),
        AttributeDef::required("displayName", "Display Name", "gluuPerson"),
        AttributeDef::required("mail", "Email", "gluuPerson"),
        AttributeDef::optional("gluuStatus", "User Status", "gluuPerson"),
        AttributeDef::optional("cn", "Common Name", "gluuPerson"),
        AttributeDef::optional("telephoneNumber", "Phone Number", "gluuCustomPerson"),
        AttributeDef::optional("preferredLanguage", "Preferred Language", "gluuCustomPerson"),
    ]
}

impl Default for PersonConfig {
    fn default() -> Self {
        Self {
            object_classes: default_object_classes(),
            object_class_display_names: Vec::new(),
            allow_modification: true,
            recheck_uniqueness_on_update: false,
            role: UserRole::default(),
            attributes: default_attributes(),
        }
    }
}

impl ModificationPolicy for PersonConfig {
    fn is_person_modification_allowed(&self) -> bool {
        self.allow_modification
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// External hook module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Run the hook command around mutations.
    #[serde(default)]
    pub enabled: bool,

    /// Executable invoked with the hook point name as its last argument.
    #[serde(default)]
    pub command: Option<PathBuf>,

    /// Extra arguments placed before the hook point name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Remove a person's devices after the person is deleted.
    #[serde(default = "default_true")]
    pub cascade_devices_on_delete: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            args: Vec::new(),
            cascade_devices_on_delete: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.base_dn.trim().is_empty() {
            return Err(invalid("directory.base_dn", "base DN must not be empty"));
        }
        if self.directory.org_inum.trim().is_empty() {
            return Err(invalid("directory.org_inum", "organization inum must not be empty"));
        }
        if !(4..=31).contains(&self.directory.password_cost) {
            return Err(invalid(
                "directory.password_cost",
                "bcrypt cost must be between 4 and 31",
            ));
        }
        if self.person.object_classes.is_empty() {
            return Err(invalid(
                "person.object_classes",
                "at least one object class is required",
            ));
        }
        if !self.person.object_class_display_names.is_empty()
            && self.person.object_class_display_names.len() != self.person.object_classes.len()
        {
            return Err(invalid(
                "person.object_class_display_names",
                "must have one entry per object class",
            ));
        }

        let mut seen = HashSet::new();
        for attr in &self.person.attributes {
            if attr.name.trim().is_empty() {
                return Err(invalid("person.attributes", "attribute name must not be empty"));
            }
            if !seen.insert(attr.name.to_ascii_lowercase()) {
                return Err(invalid(
                    "person.attributes",
                    &format!("attribute '{}' is defined twice", attr.name),
                ));
            }
        }

        if self.hooks.enabled && self.hooks.command.is_none() {
            return Err(invalid("hooks.command", "hooks are enabled but no command is set"));
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[directory]
database = "/tmp/personctl/people.db"
base_dn = "o=example,o=gluu"
org_inum = "@!AAAA"
org_iname = "@!example"
password_cost = 6

[person]
object_classes = ["gluuPerson", "exampleCustomPerson"]
object_class_display_names = ["Person", "Example Person"]
allow_modification = true
recheck_uniqueness_on_update = true
role = "manager"

[[person.attributes]]
name = "uid"
display_name = "Username"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "employeeNumber"
display_name = "Employee Number"
origin = "exampleCustomPerson"
roles = ["admin", "manager"]

[hooks]
enabled = true
command = "/usr/local/bin/person-hook"
args = ["--verbose"]
cascade_devices_on_delete = false

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.directory.base_dn, "o=example,o=gluu");
        assert_eq!(config.directory.password_cost, 6);
        assert_eq!(config.person.role, UserRole::Manager);
        assert!(config.person.recheck_uniqueness_on_update);
        assert_eq!(config.person.attributes.len(), 2);
        assert!(config.person.attributes[0].required);
        assert_eq!(config.person.attributes[1].roles, vec![UserRole::Admin, UserRole::Manager]);
        assert_eq!(config.hooks.args, vec!["--verbose"]);
        assert!(!config.hooks.cascade_devices_on_delete);
        config.validate().expect("sample config should validate");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personctl.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/personctl.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.directory.org_inum, "@!1111");
        assert_eq!(config.directory.password_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.person.object_classes, vec!["gluuPerson", "gluuCustomPerson"]);
        assert!(config.person.allow_modification);
        assert!(!config.person.recheck_uniqueness_on_update);
        assert_eq!(config.person.role, UserRole::Admin);
        assert!(config.person.attributes.iter().any(|a| a.name == "sn" && a.required));
        assert!(!config.hooks.enabled);
        assert!(config.hooks.cascade_devices_on_delete);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_enabled_hooks_without_command() {
        let mut config = AppConfig::default();
        config.hooks.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "hooks.command"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_attribute() {
        let mut config = AppConfig::default();
        config
            .person
            .attributes
            .push(AttributeDef::optional("UID", "Again", "gluuPerson"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "person.attributes"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_password_cost() {
        let mut config = AppConfig::default();
        config.directory.password_cost = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_follows_allow_modification() {
        let mut person = PersonConfig::default();
        assert!(person.is_person_modification_allowed());
        person.allow_modification = false;
        assert!(!person.is_person_modification_allowed());
    }
}
