//! Attribute catalog and the per-session person schema.
//!
//! The catalog answers which custom attributes exist, who may see them, and
//! which are mandatory. An edit session resolves it once into a
//! [`PersonSchema`] and works from that snapshot for its whole lifetime.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PersonConfig;

/// Roles an attribute view can be resolved for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Admin,
    Manager,
    User,
    Whitepages,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Manager => write!(f, "manager"),
            Self::User => write!(f, "user"),
            Self::Whitepages => write!(f, "whitepages"),
        }
    }
}

/// Definition of one custom attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Object class the attribute belongs to.
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multivalued: bool,
    /// Roles that see the attribute. Empty means every role.
    #[serde(default)]
    pub roles: Vec<UserRole>,
}

impl AttributeDef {
    pub fn required(name: &str, display_name: &str, origin: &str) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            origin: origin.into(),
            required: true,
            multivalued: false,
            roles: Vec::new(),
        }
    }

    pub fn optional(name: &str, display_name: &str, origin: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, display_name, origin)
        }
    }

    pub fn visible_to(&self, role: UserRole) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }
}

/// Source of attribute definitions.
pub trait AttributeCatalog: Send + Sync {
    /// Attributes visible to `role`.
    fn list_attributes(&self, role: UserRole) -> Vec<AttributeDef>;

    /// Distinct origins of `attrs`, in first-seen order.
    fn list_origins(&self, attrs: &[AttributeDef]) -> Vec<String> {
        let mut origins: Vec<String> = Vec::new();
        for attr in attrs {
            if !attr.origin.is_empty() && !origins.contains(&attr.origin) {
                origins.push(attr.origin.clone());
            }
        }
        origins
    }

    /// Attributes every new person must carry.
    fn list_mandatory(&self) -> Vec<AttributeDef>;
}

/// Catalog backed by the `[[person.attributes]]` configuration.
#[derive(Debug, Clone)]
pub struct ConfigCatalog {
    attributes: Vec<AttributeDef>,
}

impl ConfigCatalog {
    pub fn new(attributes: Vec<AttributeDef>) -> Self {
        Self { attributes }
    }

    pub fn from_config(config: &PersonConfig) -> Self {
        Self::new(config.attributes.clone())
    }
}

impl AttributeCatalog for ConfigCatalog {
    fn list_attributes(&self, role: UserRole) -> Vec<AttributeDef> {
        self.attributes
            .iter()
            .filter(|a| a.visible_to(role))
            .cloned()
            .collect()
    }

    fn list_mandatory(&self) -> Vec<AttributeDef> {
        self.attributes.iter().filter(|a| a.required).cloned().collect()
    }
}

/// Attribute view resolved once per edit session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonSchema {
    pub role: UserRole,
    pub object_classes: Vec<String>,
    pub object_class_display_names: Vec<String>,
    pub attributes: Vec<AttributeDef>,
    pub origins: Vec<String>,
    pub mandatory: Vec<AttributeDef>,
}

impl PersonSchema {
    pub fn resolve(catalog: &dyn AttributeCatalog, config: &PersonConfig) -> Self {
        let attributes = catalog.list_attributes(config.role);
        let origins = catalog.list_origins(&attributes);
        let mandatory = catalog.list_mandatory();
        debug!(
            role = %config.role,
            attributes = attributes.len(),
            mandatory = mandatory.len(),
            "resolved person schema"
        );
        Self {
            role: config.role,
            object_classes: config.object_classes.clone(),
            object_class_display_names: config.object_class_display_names.clone(),
            attributes,
            origins,
            mandatory,
        }
    }

    pub fn definition(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Whether the session role may see and edit `name`.
    pub fn exposes(&self, name: &str) -> bool {
        self.definition(name).is_some()
    }

    /// Display name of an object class, falling back to the class itself.
    pub fn object_class_display_name<'a>(&'a self, class: &'a str) -> &'a str {
        self.object_classes
            .iter()
            .position(|c| c.eq_ignore_ascii_case(class))
            .and_then(|i| self.object_class_display_names.get(i))
            .map(String::as_str)
            .unwrap_or(class)
    }
}
