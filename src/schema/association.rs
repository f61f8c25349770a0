//! One-hop associations derived from foreign-key metadata.
//! Resolution never fails: a missing relation is not fatal, so errors yield an empty map.

use crate::config::AssociationRules;
use crate::schema::entity::{EntityDefinition, EntityRegistry};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Association {
    pub source: Arc<EntityDefinition>,
    pub target: Arc<EntityDefinition>,
    /// Column on the source table.
    pub foreign_key_column: String,
    /// Column on the target table the foreign key points at.
    pub referenced_column: String,
    pub alias: String,
    pub updatable_fields: Vec<String>,
}

/// Foreign key row: (column, referenced table, referenced column).
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct ForeignKey {
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Resolve the association map of `entity`, keyed (and aliased) by referenced table name.
pub async fn resolve_associations(
    pool: &PgPool,
    registry: &EntityRegistry,
    entity: &Arc<EntityDefinition>,
    rules: &AssociationRules,
) -> HashMap<String, Association> {
    if pool.is_closed() {
        tracing::debug!(entity = %entity.name, "pool closed; no associations");
        return HashMap::new();
    }
    match load_foreign_keys(pool, &entity.schema_name, &entity.table_name).await {
        Ok(fks) => build_associations(registry, entity, &fks, rules),
        Err(e) => {
            tracing::warn!(entity = %entity.name, error = %e, "failed to load associations");
            HashMap::new()
        }
    }
}

/// Pure part of resolution: map catalog foreign keys onto registered entities.
pub fn build_associations(
    registry: &EntityRegistry,
    entity: &Arc<EntityDefinition>,
    foreign_keys: &[ForeignKey],
    rules: &AssociationRules,
) -> HashMap<String, Association> {
    let mut out = HashMap::new();
    for fk in foreign_keys {
        let Some(target) = registry.get(&fk.referenced_table) else {
            continue;
        };
        // First foreign key to a table wins; the alias stays unique.
        if out.contains_key(&fk.referenced_table) {
            continue;
        }
        out.insert(
            fk.referenced_table.clone(),
            Association {
                source: Arc::clone(entity),
                target: Arc::clone(target),
                foreign_key_column: fk.column_name.clone(),
                referenced_column: fk.referenced_column.clone(),
                alias: fk.referenced_table.clone(),
                updatable_fields: rules.updatable_fields(&entity.table_name, &fk.referenced_table),
            },
        );
    }
    out
}

async fn load_foreign_keys(pool: &PgPool, schema: &str, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
    let sql = "SELECT kcu.column_name::text AS column_name, ccu.table_name::text AS referenced_table, \
               ccu.column_name::text AS referenced_column \
               FROM information_schema.table_constraints tc \
               JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
               JOIN information_schema.constraint_column_usage ccu \
                 ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema \
               WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
               ORDER BY kcu.ordinal_position, tc.constraint_name";
    tracing::debug!(sql = %sql, schema = %schema, table = %table, "query");
    sqlx::query_as::<_, ForeignKey>(sql)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationRule;
    use crate::schema::entity::tests::{col, tasks_entity};

    fn fk(column: &str, table: &str, referenced: &str) -> ForeignKey {
        ForeignKey {
            column_name: column.into(),
            referenced_table: table.into(),
            referenced_column: referenced.into(),
        }
    }

    fn registry() -> EntityRegistry {
        let goals = EntityDefinition::new("public", "goals", vec![col("id", "int4"), col("progress", "int4")]);
        let users = EntityDefinition::new("public", "users", vec![col("id", "int4"), col("custom_id", "varchar")]);
        EntityRegistry::new(vec![tasks_entity(), goals, users])
    }

    #[test]
    fn maps_foreign_keys_to_registered_entities() {
        let reg = registry();
        let tasks = reg.get("tasks").unwrap().clone();
        let rules = AssociationRules {
            default_updatable_fields: vec![],
            rules: vec![AssociationRule {
                source: Some("tasks".into()),
                target: "goals".into(),
                updatable_fields: vec!["progress".into()],
            }],
        };
        let fks = vec![
            fk("goal_id", "goals", "id"),
            fk("user_custom_id", "users", "custom_id"),
            fk("archive_id", "archives", "id"),
        ];
        let map = build_associations(&reg, &tasks, &fks, &rules);
        assert_eq!(map.len(), 2);
        let goals = &map["goals"];
        assert_eq!(goals.alias, "goals");
        assert_eq!(goals.foreign_key_column, "goal_id");
        assert_eq!(goals.referenced_column, "id");
        assert_eq!(goals.updatable_fields, vec!["progress"]);
        assert!(map["users"].updatable_fields.is_empty());
        assert!(!map.contains_key("archives"));
    }

    #[test]
    fn no_foreign_keys_yields_empty_map() {
        let reg = registry();
        let goals = reg.get("goals").unwrap().clone();
        assert!(build_associations(&reg, &goals, &[], &AssociationRules::default()).is_empty());
    }

    #[test]
    fn duplicate_targets_keep_first_alias() {
        let reg = registry();
        let tasks = reg.get("tasks").unwrap().clone();
        let fks = vec![fk("goal_id", "goals", "id"), fk("parent_goal_id", "goals", "id")];
        let map = build_associations(&reg, &tasks, &fks, &AssociationRules::default());
        assert_eq!(map.len(), 1);
        assert_eq!(map["goals"].foreign_key_column, "goal_id");
    }

    #[tokio::test]
    async fn closed_pool_soft_fails() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/crudgate_unused")
            .unwrap();
        pool.close().await;
        let reg = registry();
        let tasks = reg.get("tasks").unwrap().clone();
        assert!(resolve_associations(&pool, &reg, &tasks, &AssociationRules::default()).await.is_empty());
    }
}
