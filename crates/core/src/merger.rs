//! Reconciliation of custom attributes between the store and an edit session.

use std::collections::BTreeSet;

use tracing::debug;

use crate::catalog::PersonSchema;
use crate::models::{find_attribute, CustomAttribute, PersonRecord, PersonStatus};

const STATUS_ATTRIBUTE: &str = "gluuStatus";
const COMMON_NAME_ATTRIBUTE: &str = "cn";
const EMAIL_MIRROR_ATTRIBUTE: &str = "oxTrustEmail";

pub struct CustomAttributeMerger;

impl CustomAttributeMerger {
    /// Attributes present in `live` whose name no longer appears in `session`.
    pub fn detect_removed(
        session: &[CustomAttribute],
        live: &[CustomAttribute],
    ) -> Vec<CustomAttribute> {
        live.iter()
            .filter(|attr| find_attribute(session, &attr.name).is_none())
            .cloned()
            .collect()
    }

    /// The session list followed by the removed attributes, unchanged.
    pub fn reconcile(
        session: &[CustomAttribute],
        removed: &[CustomAttribute],
    ) -> Vec<CustomAttribute> {
        session.iter().chain(removed).cloned().collect()
    }

    /// Write `status` into every status attribute. No-op when there is none.
    pub fn apply_status(attrs: &mut [CustomAttribute], status: PersonStatus) {
        for attr in attrs.iter_mut().filter(|a| a.is_named(STATUS_ATTRIBUTE)) {
            attr.set_value(status.as_str());
        }
    }

    /// Inject or extend the composite common name.
    pub fn ensure_common_name(person: &mut PersonRecord) {
        let given = person.given_name.clone().unwrap_or_default();
        let display = person.display_name.clone().unwrap_or_default();

        match person
            .custom_attributes
            .iter()
            .position(|a| a.is_named(COMMON_NAME_ATTRIBUTE))
        {
            Some(index) => {
                let cn = &mut person.custom_attributes[index];
                let current = cn.value().unwrap_or_default().to_string();
                cn.set_value(format!("{current} {given}"));
            }
            None => person
                .custom_attributes
                .push(CustomAttribute::new(COMMON_NAME_ATTRIBUTE, format!("{given} {display}"))),
        }
    }

    /// Mirror `mail` into the `oxTrustEmail` attribute as a primary email
    /// entry. An empty contact address drops the mirror.
    pub fn sync_contact_email(person: &mut PersonRecord) {
        let mail = person.mail.as_deref().map(str::trim).unwrap_or_default();
        if mail.is_empty() {
            person
                .custom_attributes
                .retain(|a| !a.is_named(EMAIL_MIRROR_ATTRIBUTE));
            return;
        }

        let entry = serde_json::json!({
            "value": mail,
            "display": mail,
            "primary": true,
            "type": "other",
        })
        .to_string();

        let mut seen = false;
        person.custom_attributes.retain_mut(|a| {
            if !a.is_named(EMAIL_MIRROR_ATTRIBUTE) {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            a.set_value(entry.clone());
            true
        });
        if !seen {
            person
                .custom_attributes
                .push(CustomAttribute::new(EMAIL_MIRROR_ATTRIBUTE, entry));
        }
    }

    /// Union of configured and record classes.
    pub fn normalize_object_classes(configured: &[String], person: &PersonRecord) -> BTreeSet<String> {
        configured
            .iter()
            .chain(&person.object_classes)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Build the attribute list an edit session starts with.
    ///
    /// New people get an empty placeholder for every mandatory attribute
    /// that is not a core record field.
    pub fn init_session_attributes(
        schema: &PersonSchema,
        live: &[CustomAttribute],
        new_person: bool,
    ) -> Vec<CustomAttribute> {
        if !new_person {
            return live
                .iter()
                .filter(|a| schema.exposes(&a.name))
                .cloned()
                .collect();
        }

        let mut attrs = live.to_vec();
        for def in &schema.mandatory {
            if !PersonRecord::is_core_field(&def.name)
                && find_attribute(&attrs, &def.name).is_none()
            {
                attrs.push(CustomAttribute::empty(def.name.clone()));
            }
        }
        debug!(attributes = attrs.len(), "initialized session attributes for new person");
        attrs
    }
}
