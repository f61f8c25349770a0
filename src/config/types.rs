//! Runtime settings and association rule types.

use serde::{Deserialize, Serialize};

/// Updatable fields for one association. `source` omitted means "any source table".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRule {
    #[serde(default)]
    pub source: Option<String>,
    pub target: String,
    #[serde(default)]
    pub updatable_fields: Vec<String>,
}

/// Association rules as read from `ASSOCIATIONS_PATH`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRules {
    /// Used when no rule matches the (source, target) pair.
    #[serde(default)]
    pub default_updatable_fields: Vec<String>,
    #[serde(default)]
    pub rules: Vec<AssociationRule>,
}

impl AssociationRules {
    /// Exact (source, target) rule first, then a target-only rule, then the default list.
    pub fn updatable_fields(&self, source: &str, target: &str) -> Vec<String> {
        self.rules
            .iter()
            .find(|r| r.target == target && r.source.as_deref() == Some(source))
            .or_else(|| self.rules.iter().find(|r| r.target == target && r.source.is_none()))
            .map(|r| r.updatable_fields.clone())
            .unwrap_or_else(|| self.default_updatable_fields.clone())
    }
}

/// Application settings. Identifiers are validated before use (see `validate_settings`).
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Schema whose base tables become entities and which holds the RBAC tables.
    pub db_schema: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub users_table: String,
    /// Column of every user-scoped entity holding the owner's external id.
    pub owner_field: String,
    /// Stable external id column of users and associated records.
    pub external_id_field: String,
    /// Payload key carrying the associated record's external id on create.
    pub assoc_ref_field: String,
    /// Payload key selecting which association the reference targets.
    pub assoc_entity_field: String,
    pub body_limit_bytes: usize,
    pub associations: AssociationRules,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/crudgate".into(),
            db_schema: "public".into(),
            bind_addr: "0.0.0.0:3000".into(),
            max_connections: 5,
            users_table: "users".into(),
            owner_field: "user_custom_id".into(),
            external_id_field: "custom_id".into(),
            assoc_ref_field: "assoc_custom_id".into(),
            assoc_entity_field: "assoc_entity".into(),
            body_limit_bytes: 1024 * 1024,
            associations: AssociationRules::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_precedence() {
        let rules: AssociationRules = serde_json::from_value(serde_json::json!({
            "default_updatable_fields": ["status"],
            "rules": [
                { "target": "goals", "updatable_fields": ["progress"] },
                { "source": "tasks", "target": "goals", "updatable_fields": ["progress", "note"] }
            ]
        }))
        .unwrap();
        assert_eq!(rules.updatable_fields("tasks", "goals"), vec!["progress", "note"]);
        assert_eq!(rules.updatable_fields("weeks", "goals"), vec!["progress"]);
        assert_eq!(rules.updatable_fields("tasks", "users"), vec!["status"]);
        assert!(AssociationRules::default().updatable_fields("tasks", "goals").is_empty());
    }
}
