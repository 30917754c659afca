//! Domain model types used throughout personctl.
//!
//! These types bridge the mutation pipeline, the SQLite store, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Account status of a person.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersonStatus {
    #[default]
    Active,
    Inactive,
}

impl PersonStatus {
    /// Canonical directory value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Parse a status string, case-insensitively.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for PersonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Custom attributes
// ---------------------------------------------------------------------------

/// A schema-driven name/value field attached to a person.
///
/// Names compare case-insensitively. A record may hold several attributes
/// with the same name; lookups take the first one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomAttribute {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl CustomAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    pub fn multi(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// An attribute with no value yet.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// First value, if any.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// Replace all values with a single one.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.values = vec![value.into()];
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// True when at least one value is non-blank.
    pub fn has_value(&self) -> bool {
        self.values.iter().any(|v| !v.trim().is_empty())
    }
}

/// Find the first attribute with the given name.
pub fn find_attribute<'a>(attrs: &'a [CustomAttribute], name: &str) -> Option<&'a CustomAttribute> {
    attrs.iter().find(|a| a.is_named(name))
}

// ---------------------------------------------------------------------------
// External auth bindings
// ---------------------------------------------------------------------------

/// A parsed `provider:value` external-auth binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAuthBinding {
    pub provider: String,
    pub value: String,
}

impl ExternalAuthBinding {
    /// Split on the first `:`. A string without `:` is all provider.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((provider, value)) => Self {
                provider: provider.to_string(),
                value: value.to_string(),
            },
            None => Self {
                provider: raw.to_string(),
                value: String::new(),
            },
        }
    }
}

impl std::fmt::Display for ExternalAuthBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.value)
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

const CORE_FIELDS: [&str; 5] = ["uid", "givenName", "displayName", "mail", "gluuStatus"];

/// A person entry in the directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonRecord {
    /// Internal unique identifier, assigned on create.
    #[serde(default)]
    pub inum: Option<String>,
    /// Generated internal name, assigned on create.
    #[serde(default)]
    pub iname: Option<String>,
    /// Storage location, assigned on create.
    #[serde(default)]
    pub dn: Option<String>,
    /// Login name.
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    /// Contact address.
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub status: PersonStatus,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    pub object_classes: Vec<String>,
    /// `provider:value` strings.
    #[serde(default)]
    pub external_uids: Vec<String>,
    /// Write-only.
    #[serde(skip)]
    pub password: Option<String>,
}

impl PersonRecord {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// The `inum`, or an empty string for a record that was never stored.
    pub fn id(&self) -> &str {
        self.inum.as_deref().unwrap_or("")
    }

    pub fn attribute(&self, name: &str) -> Option<&CustomAttribute> {
        find_attribute(&self.custom_attributes, name)
    }

    /// First value of the `cn` attribute.
    pub fn common_name(&self) -> Option<&str> {
        self.attribute("cn").and_then(CustomAttribute::value)
    }

    /// Whether `name` is stored on the record itself rather than as a
    /// custom attribute.
    pub fn is_core_field(name: &str) -> bool {
        CORE_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Value of a field by directory attribute name.
    ///
    /// Core fields are read from the record itself, anything else from the
    /// custom attributes.
    pub fn field_value(&self, name: &str) -> Option<String> {
        let core = match name.to_ascii_lowercase().as_str() {
            "uid" => Some(Some(self.uid.clone())),
            "givenname" => Some(self.given_name.clone()),
            "displayname" => Some(self.display_name.clone()),
            "mail" => Some(self.mail.clone()),
            "gluustatus" => Some(Some(self.status.as_str().to_string())),
            _ => None,
        };
        match core {
            Some(value) => value.filter(|v| !v.trim().is_empty()),
            None => self
                .attribute(name)
                .filter(|a| a.has_value())
                .and_then(|a| a.value().map(str::to_string)),
        }
    }

    pub fn external_bindings(&self) -> Vec<ExternalAuthBinding> {
        self.external_uids
            .iter()
            .map(|raw| ExternalAuthBinding::parse(raw))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A raw device row as held by the device store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub person_inum: String,
    /// JSON blob.
    pub device_data: String,
    pub created_at: DateTime<Utc>,
}

/// Decoded authentication-device data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub uuid: Uuid,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

impl DeviceInfo {
    /// A device with a fresh UUID and no metadata.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            device_type: None,
            platform: None,
            name: None,
            os_name: None,
            os_version: None,
            push_token: None,
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded device together with the id of the row it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDevice {
    pub record_id: String,
    pub info: DeviceInfo,
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub inum: Option<String>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(action: &str, inum: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            inum: inum.map(str::to_string),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(action: &str, inum: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            inum: inum.map(str::to_string),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}
