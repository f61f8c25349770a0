//! Build the entity registry from information_schema of the configured schema.

use crate::error::SchemaError;
use crate::schema::entity::{ColumnDef, ColumnType, EntityDefinition, EntityRegistry};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

/// One row of information_schema.columns, all fields read as text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub udt_schema: String,
    pub udt_name: String,
    pub is_nullable: String,
    pub column_default: Option<String>,
    pub is_identity: String,
}

/// Load every base table of `schema` as an entity. Fails if any catalog query fails.
pub async fn load_entities(pool: &PgPool, schema: &str) -> Result<EntityRegistry, SchemaError> {
    let tables = load_table_names(pool, schema).await?;
    let columns = load_columns(pool, schema).await?;
    let primary_keys = load_primary_keys(pool, schema).await?;

    let mut columns_by_table: HashMap<&str, Vec<&CatalogColumn>> = HashMap::new();
    for c in &columns {
        columns_by_table.entry(c.table_name.as_str()).or_default().push(c);
    }

    let entities: Vec<EntityDefinition> = tables
        .iter()
        .map(|table| {
            let cols = columns_by_table.get(table.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let pks = primary_keys.get(table.as_str());
            build_entity(schema, table, cols, pks)
        })
        .collect();

    let registry = EntityRegistry::new(entities);
    tracing::info!(schema = %schema, entities = ?registry.names(), "entities loaded");
    Ok(registry)
}

/// Assemble one entity from its catalog rows (ordinal order) and catalog primary key columns.
pub fn build_entity(
    schema: &str,
    table: &str,
    columns: &[&CatalogColumn],
    primary_keys: Option<&Vec<String>>,
) -> EntityDefinition {
    let pk_set: HashSet<&str> = primary_keys
        .map(|v| v.iter().map(String::as_str).collect())
        .unwrap_or_default();
    // Keep catalog key order so a composite key elects its first column.
    let mut defs: Vec<ColumnDef> = columns.iter().map(|c| column_def(c, pk_set.contains(c.column_name.as_str()))).collect();
    if let Some(first_pk) = primary_keys.and_then(|v| v.first()) {
        for d in defs.iter_mut() {
            d.is_primary_key = d.name == *first_pk;
        }
    }
    EntityDefinition::new(schema, table, defs)
}

fn column_def(c: &CatalogColumn, is_pk: bool) -> ColumnDef {
    let sql_type = if c.udt_schema == "pg_catalog" {
        c.udt_name.clone()
    } else {
        format!("\"{}\".\"{}\"", c.udt_schema.replace('"', "\"\""), c.udt_name.replace('"', "\"\""))
    };
    // data_type is the SQL-standard spelling; udt_name covers USER-DEFINED and ARRAY.
    let column_type = match c.data_type.as_str() {
        "USER-DEFINED" | "ARRAY" => ColumnType::from_sql(&c.udt_name),
        dt => ColumnType::from_sql(dt),
    };
    let is_auto_increment = c.is_identity.eq_ignore_ascii_case("YES")
        || c.column_default.as_deref().map(|d| d.starts_with("nextval(")).unwrap_or(false);
    ColumnDef {
        name: c.column_name.clone(),
        column_type,
        sql_type,
        nullable: c.is_nullable.eq_ignore_ascii_case("YES"),
        is_primary_key: is_pk,
        is_auto_increment,
        has_default: c.column_default.is_some() || is_auto_increment,
    }
}

async fn load_table_names(pool: &PgPool, schema: &str) -> Result<Vec<String>, SchemaError> {
    let sql = "SELECT table_name::text FROM information_schema.tables \
               WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";
    tracing::debug!(sql = %sql, schema = %schema, "query");
    sqlx::query_scalar::<_, String>(sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| SchemaError::Load(e.to_string()))
}

async fn load_columns(pool: &PgPool, schema: &str) -> Result<Vec<CatalogColumn>, SchemaError> {
    let sql = "SELECT table_name::text AS table_name, column_name::text AS column_name, \
               data_type::text AS data_type, udt_schema::text AS udt_schema, udt_name::text AS udt_name, \
               is_nullable::text AS is_nullable, column_default::text AS column_default, \
               COALESCE(is_identity::text, 'NO') AS is_identity \
               FROM information_schema.columns WHERE table_schema = $1 \
               ORDER BY table_name, ordinal_position";
    tracing::debug!(sql = %sql, schema = %schema, "query");
    sqlx::query_as::<_, CatalogColumn>(sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| SchemaError::Load(e.to_string()))
}

/// table name -> primary key columns in key order.
async fn load_primary_keys(pool: &PgPool, schema: &str) -> Result<HashMap<String, Vec<String>>, SchemaError> {
    let sql = "SELECT kcu.table_name::text, kcu.column_name::text \
               FROM information_schema.table_constraints tc \
               JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                AND tc.table_name = kcu.table_name \
               WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 \
               ORDER BY kcu.table_name, kcu.ordinal_position";
    tracing::debug!(sql = %sql, schema = %schema, "query");
    let rows = sqlx::query_as::<_, (String, String)>(sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| SchemaError::Load(e.to_string()))?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (table, column) in rows {
        out.entry(table).or_default().push(column);
    }
    Ok(out)
}
