//! Entity definitions discovered from the catalog. Built once at startup, read-only afterwards.

use crate::case::{to_camel_case, to_snake_case};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Column type inferred from the native SQL type name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInt,
    SmallInt,
    TinyInt,
    Decimal,
    Float,
    Double,
    Char,
    VarChar,
    Text,
    Date,
    Boolean,
    /// Generic text for anything not in the mapping table.
    String,
}

#[derive(Debug)]
pub struct UnknownSqlType(pub String);

impl FromStr for ColumnType {
    type Err = UnknownSqlType;

    /// Accepts `VARCHAR(255)`, `timestamp with time zone`, `int4`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.split('(').next().unwrap_or("").trim().to_lowercase();
        let ty = match base.as_str() {
            "int" | "integer" | "int4" | "serial" | "serial4" | "mediumint" => ColumnType::Integer,
            "bigint" | "int8" | "bigserial" | "serial8" => ColumnType::BigInt,
            "smallint" | "int2" | "smallserial" | "serial2" => ColumnType::SmallInt,
            "tinyint" => ColumnType::TinyInt,
            "decimal" | "numeric" => ColumnType::Decimal,
            "float" | "real" | "float4" => ColumnType::Float,
            "double" | "double precision" | "float8" => ColumnType::Double,
            "char" | "character" | "bpchar" => ColumnType::Char,
            "varchar" | "character varying" => ColumnType::VarChar,
            "text" => ColumnType::Text,
            "date" | "datetime" | "timestamp" | "timestamptz" => ColumnType::Date,
            b if b.starts_with("timestamp") => ColumnType::Date,
            "boolean" | "bool" => ColumnType::Boolean,
            _ => return Err(UnknownSqlType(s.to_string())),
        };
        Ok(ty)
    }
}

impl ColumnType {
    /// Map a native type name, falling back to generic text.
    pub fn from_sql(name: &str) -> Self {
        name.parse().unwrap_or_else(|UnknownSqlType(t)| {
            tracing::debug!(sql_type = %t, "unmapped column type, using string");
            ColumnType::String
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::BigInt | ColumnType::SmallInt | ColumnType::TinyInt
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, ColumnType::Decimal | ColumnType::Float | ColumnType::Double)
    }

    /// Inclusive bounds of an integer column.
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::SmallInt | ColumnType::TinyInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Convert a raw query-string value into a JSON value typed for this column.
    /// None when the value cannot be stored in the column (not a number, out of range, not a boolean).
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        if let Some((min, max)) = self.integer_range() {
            return raw
                .parse::<i64>()
                .ok()
                .filter(|n| (min..=max).contains(n))
                .map(|n| Value::Number(n.into()));
        }
        match self {
            ColumnType::Decimal => raw
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|_| Value::String(raw.to_string())),
            ColumnType::Float => raw
                .parse::<f32>()
                .ok()
                .filter(|n| n.is_finite())
                .and_then(|n| serde_json::Number::from_f64(n as f64))
                .map(Value::Number),
            ColumnType::Double => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ColumnType::Boolean => match raw.to_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => Some(Value::String(raw.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Native type used in placeholder casts, schema-qualified for user-defined types.
    pub sql_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    pub has_default: bool,
}

impl ColumnDef {
    /// Placeholder with a cast to the column's native type.
    pub fn placeholder(&self, n: usize) -> String {
        format!("${}::{}", n, self.sql_type)
    }

    /// Whether sqlx can decode the column directly; others are selected as text.
    pub fn decodes_natively(&self) -> bool {
        matches!(
            self.sql_type.as_str(),
            "int2" | "int4" | "int8" | "float4" | "float8" | "bool" | "text" | "varchar" | "bpchar"
                | "name" | "uuid" | "date" | "timestamp" | "timestamptz" | "json" | "jsonb"
        )
    }
}

#[derive(Clone, Debug)]
pub struct EntityDefinition {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: String,
    pub timestamps_enabled: bool,
}

const CREATED_COLUMNS: [&str; 2] = ["created_at", "createdAt"];
const UPDATED_COLUMNS: [&str; 2] = ["updated_at", "updatedAt"];

impl EntityDefinition {
    /// Build a definition, electing the primary key: first catalog-marked key column,
    /// else a column named `id` in any case, else the literal `id`.
    pub fn new(schema_name: &str, table_name: &str, mut columns: Vec<ColumnDef>) -> Self {
        let primary_key = columns
            .iter()
            .find(|c| c.is_primary_key)
            .or_else(|| columns.iter().find(|c| c.name.eq_ignore_ascii_case("id")))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| {
                tracing::warn!(table = %table_name, "no primary key or id column; assuming \"id\"");
                "id".to_string()
            });
        for c in columns.iter_mut() {
            c.is_primary_key = c.name == primary_key;
        }
        let has_any = |names: &[&str]| columns.iter().any(|c| names.contains(&c.name.as_str()));
        let timestamps_enabled = has_any(&CREATED_COLUMNS) && has_any(&UPDATED_COLUMNS);
        EntityDefinition {
            name: table_name.to_string(),
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            columns,
            primary_key,
            timestamps_enabled,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&ColumnDef> {
        self.column(&self.primary_key)
    }

    /// Resolve a client-supplied field to a real column: exact, then snake_case, then camelCase.
    pub fn resolve_column(&self, field: &str) -> Option<&ColumnDef> {
        self.column(field)
            .or_else(|| self.column(&to_snake_case(field)))
            .or_else(|| self.column(&to_camel_case(field)))
    }

    pub fn created_column(&self) -> Option<&ColumnDef> {
        if !self.timestamps_enabled {
            return None;
        }
        CREATED_COLUMNS.iter().find_map(|n| self.column(n))
    }

    pub fn updated_column(&self) -> Option<&ColumnDef> {
        if !self.timestamps_enabled {
            return None;
        }
        UPDATED_COLUMNS.iter().find_map(|n| self.column(n))
    }

    /// Parse a path id into a JSON value typed for the primary key; None when it cannot be a key.
    pub fn parse_id(&self, raw: &str) -> Option<Value> {
        match self.primary_key_column() {
            Some(c) => c.column_type.coerce(raw),
            None => Some(Value::String(raw.to_string())),
        }
    }
}

/// Process-wide entity registry, owned by the application context.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    by_name: HashMap<String, Arc<EntityDefinition>>,
}

impl EntityRegistry {
    pub fn new(entities: impl IntoIterator<Item = EntityDefinition>) -> Self {
        EntityRegistry {
            by_name: entities
                .into_iter()
                .map(|e| (e.table_name.clone(), Arc::new(e)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDefinition>> {
        self.by_name.get(name)
    }

    /// Lookup for a path segment; resource names are matched lowercased.
    pub fn by_resource(&self, resource: &str) -> Option<&Arc<EntityDefinition>> {
        self.by_name
            .get(resource)
            .or_else(|| self.by_name.get(&resource.to_lowercase()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
