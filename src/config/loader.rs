//! Load settings from the environment and association rules from a JSON file.

use crate::config::types::{AssociationRules, Settings};
use crate::config::validate_settings;
use crate::error::SchemaError;
use std::path::Path;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, SchemaError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| SchemaError::InvalidSetting {
            name,
            reason: format!("cannot parse '{}'", v),
        }),
        _ => Ok(default),
    }
}

impl Settings {
    /// Read settings from env (call `dotenvy::dotenv()` first to honor `.env`).
    ///
    /// `DATABASE_URL`, `DB_SCHEMA`, `BIND_ADDR`, `MAX_CONNECTIONS`, `USERS_TABLE`, `OWNER_FIELD`,
    /// `EXTERNAL_ID_FIELD`, `ASSOC_REF_FIELD`, `ASSOC_ENTITY_FIELD`, `BODY_LIMIT_BYTES`, `ASSOCIATIONS_PATH`.
    pub fn from_env() -> Result<Self, SchemaError> {
        let d = Settings::default();
        let associations = match std::env::var("ASSOCIATIONS_PATH") {
            Ok(path) if !path.trim().is_empty() => load_association_rules(Path::new(path.trim()))?,
            _ => AssociationRules::default(),
        };
        let settings = Settings {
            database_url: env_or("DATABASE_URL", &d.database_url),
            db_schema: env_or("DB_SCHEMA", &d.db_schema),
            bind_addr: env_or("BIND_ADDR", &d.bind_addr),
            max_connections: env_parse("MAX_CONNECTIONS", d.max_connections)?,
            users_table: env_or("USERS_TABLE", &d.users_table),
            owner_field: env_or("OWNER_FIELD", &d.owner_field),
            external_id_field: env_or("EXTERNAL_ID_FIELD", &d.external_id_field),
            assoc_ref_field: env_or("ASSOC_REF_FIELD", &d.assoc_ref_field),
            assoc_entity_field: env_or("ASSOC_ENTITY_FIELD", &d.assoc_entity_field),
            body_limit_bytes: env_parse("BODY_LIMIT_BYTES", d.body_limit_bytes)?,
            associations,
        };
        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// Parse association rules from a JSON file.
pub fn load_association_rules(path: &Path) -> Result<AssociationRules, SchemaError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SchemaError::Rules(format!("{}: {}", path.display(), e)))?;
    parse_association_rules(&raw)
}

pub fn parse_association_rules(raw: &str) -> Result<AssociationRules, SchemaError> {
    serde_json::from_str(raw).map_err(|e| SchemaError::Rules(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_with_defaults() {
        let rules = parse_association_rules(r#"{ "rules": [ { "target": "goals" } ] }"#).unwrap();
        assert!(rules.default_updatable_fields.is_empty());
        assert_eq!(rules.rules[0].source, None);
        assert!(rules.rules[0].updatable_fields.is_empty());
    }

    #[test]
    fn rejects_malformed_rules() {
        let err = parse_association_rules(r#"{ "rules": [ { "source": "tasks" } ] }"#).unwrap_err();
        assert!(matches!(err, SchemaError::Rules(_)));
    }

    #[test]
    fn missing_rules_file_is_an_error() {
        let err = load_association_rules(Path::new("/nonexistent/associations.json")).unwrap_err();
        assert!(err.to_string().contains("associations.json"));
    }
}
