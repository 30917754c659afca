//! Pre-create checks for person drafts.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::debug;

use crate::catalog::AttributeDef;
use crate::errors::ValidationError;
use crate::models::PersonRecord;
use crate::store::DirectoryStore;

static UID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._@+-]+$").expect("UID_PATTERN is a valid regex pattern")
});

static MAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("MAIL_PATTERN is a valid regex pattern")
});

pub struct RecordValidator<'a> {
    store: &'a dyn DirectoryStore,
    mandatory: &'a [AttributeDef],
}

impl<'a> RecordValidator<'a> {
    pub fn new(store: &'a dyn DirectoryStore, mandatory: &'a [AttributeDef]) -> Self {
        Self { store, mandatory }
    }

    /// Check a draft before it is created.
    ///
    /// Order: login name presence and shape, login uniqueness, contact
    /// uniqueness, mandatory attributes, contact shape.
    pub fn validate_for_create(&self, person: &PersonRecord) -> Result<(), ValidationError> {
        let uid = person.uid.trim();
        if uid.is_empty() {
            return Err(ValidationError::MissingField("uid".into()));
        }
        if !UID_PATTERN.is_match(uid) {
            return Err(ValidationError::InvalidField {
                field: "uid".into(),
                detail: format!("'{uid}' contains characters not allowed in a login name"),
            });
        }

        let existing = self.store.find_by_login(uid).map_err(|source| ValidationError::Lookup {
            uid: uid.to_string(),
            source,
        })?;
        if existing.is_some() {
            debug!(uid, "login name already taken");
            return Err(ValidationError::DuplicateIdentifier(uid.to_string()));
        }

        let mail = person.mail.as_deref().map(str::trim).filter(|m| !m.is_empty());
        if let Some(mail) = mail {
            let existing = self
                .store
                .find_by_contact(mail)
                .map_err(|source| ValidationError::Lookup {
                    uid: uid.to_string(),
                    source,
                })?;
            if existing.is_some() {
                debug!(uid, mail, "contact address already taken");
                return Err(ValidationError::DuplicateContact(mail.to_string()));
            }
        }

        for attr in self.mandatory {
            if person.field_value(&attr.name).is_none() {
                return Err(ValidationError::MissingField(attr.name.clone()));
            }
        }

        if let Some(mail) = mail {
            if !MAIL_PATTERN.is_match(mail) {
                return Err(ValidationError::InvalidField {
                    field: "mail".into(),
                    detail: format!("'{mail}' is not a valid address"),
                });
            }
        }

        Ok(())
    }
}

/// Check that a password and its confirmation match exactly.
pub fn validate_password_confirmation(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password == confirm {
        Ok(())
    } else {
        Err(ValidationError::PasswordMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::CustomAttribute;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn store(db: &Database, uid: &str, mail: &str) {
        let mut person = PersonRecord::new(uid);
        person.inum = Some(db.generate_id().unwrap());
        person.mail = Some(mail.into());
        db.create(&person).unwrap();
    }

    fn draft(uid: &str, mail: &str) -> PersonRecord {
        let mut person = PersonRecord::new(uid);
        person.mail = Some(mail.into());
        person.given_name = Some("Jane".into());
        person.custom_attributes = vec![CustomAttribute::new("sn", "Doe")];
        person
    }

    fn mandatory() -> Vec<AttributeDef> {
        vec![
            AttributeDef::required("uid", "Username", "gluuPerson"),
            AttributeDef::required("givenName", "First Name", "gluuPerson"),
            AttributeDef::required("sn", "Last Name", "gluuPerson"),
        ]
    }

    #[test]
    fn test_valid_draft_passes() {
        let db = setup_db();
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);
        validator.validate_for_create(&draft("jane", "jane@example.com")).unwrap();
    }

    #[test]
    fn test_duplicate_uid_is_case_insensitive() {
        let db = setup_db();
        store(&db, "jane", "other@example.com");
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);
        let err = validator
            .validate_for_create(&draft("JANE", "jane@example.com"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateIdentifier(ref u) if u == "JANE"));
    }

    #[test]
    fn test_duplicate_contact() {
        let db = setup_db();
        store(&db, "other", "jane@example.com");
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);
        let err = validator
            .validate_for_create(&draft("jane", "Jane@Example.com"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateContact(_)));
    }

    #[test]
    fn test_missing_contact_skips_contact_checks() {
        let db = setup_db();
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);
        let mut person = draft("jane", "");
        person.mail = None;
        validator.validate_for_create(&person).unwrap();
    }

    #[test]
    fn test_missing_fields() {
        let db = setup_db();
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);

        let err = validator.validate_for_create(&draft("  ", "a@b.io")).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(ref f) if f == "uid"));

        let mut person = draft("jane", "jane@example.com");
        person.custom_attributes = vec![CustomAttribute::empty("sn")];
        let err = validator.validate_for_create(&person).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(ref f) if f == "sn"));
    }

    #[test]
    fn test_shape_patterns() {
        assert!(UID_PATTERN.is_match("jane.doe+test@corp"));
        assert!(!UID_PATTERN.is_match("jane doe"));
        assert!(MAIL_PATTERN.is_match("jane@example.com"));
        assert!(!MAIL_PATTERN.is_match("jane@localhost"));
    }

    #[test]
    fn test_malformed_values() {
        let db = setup_db();
        let required = mandatory();
        let validator = RecordValidator::new(&db, &required);

        let err = validator
            .validate_for_create(&draft("jane", "not-an-address"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "mail"));

        let err = validator
            .validate_for_create(&draft("jane doe", "jane@example.com"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "uid"));
    }

    #[test]
    fn test_lookup_failure_is_reported() {
        // Schema never initialized, so the lookup query fails.
        let db = Database::in_memory().unwrap();
        let validator = RecordValidator::new(&db, &[]);
        let err = validator
            .validate_for_create(&draft("jane", "jane@example.com"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Lookup { .. }));
    }

    #[test]
    fn test_password_confirmation_is_exact() {
        assert!(validate_password_confirmation("Secret", "Secret").is_ok());
        assert!(matches!(
            validate_password_confirmation("Secret", "secret"),
            Err(ValidationError::PasswordMismatch)
        ));
    }
}
