//! Settings validation: identifiers that end up in SQL must be plain PostgreSQL identifiers.

use crate::config::Settings;
use crate::error::SchemaError;
use regex::Regex;
use std::sync::OnceLock;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex"))
}

pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_match(s)
}

pub fn validate_settings(settings: &Settings) -> Result<(), SchemaError> {
    for (name, value) in [
        ("DB_SCHEMA", &settings.db_schema),
        ("USERS_TABLE", &settings.users_table),
        ("OWNER_FIELD", &settings.owner_field),
        ("EXTERNAL_ID_FIELD", &settings.external_id_field),
        ("ASSOC_REF_FIELD", &settings.assoc_ref_field),
        ("ASSOC_ENTITY_FIELD", &settings.assoc_entity_field),
    ] {
        if !is_identifier(value) {
            return Err(SchemaError::InvalidSetting {
                name,
                reason: format!("'{}' is not a valid identifier", value),
            });
        }
    }
    if settings.max_connections == 0 {
        return Err(SchemaError::InvalidSetting {
            name: "MAX_CONNECTIONS",
            reason: "must be at least 1".into(),
        });
    }
    if settings.owner_field == settings.assoc_ref_field {
        return Err(SchemaError::InvalidSetting {
            name: "ASSOC_REF_FIELD",
            reason: "must differ from OWNER_FIELD".into(),
        });
    }
    Ok(())
}
