//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from an entity definition and a query plan.
//! Identifiers come only from the catalog and are always quoted; values are always parameters.

use crate::query::{PageWindow, Predicate, Projection, QueryPlan, SortDirection};
use crate::schema::{ColumnDef, ColumnType, EntityDefinition};
use serde_json::{Map, Value};
use std::collections::HashSet;

const MAIN_ALIAS: &str = "main";
const NO_MATCH: &str = "1 = 0";

/// Functions accepted in `aggregate=`.
pub const AGGREGATE_FUNCTIONS: [&str; 5] = ["count", "sum", "avg", "min", "max"];

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn entity_table(entity: &EntityDefinition) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Push a value cast to the column's native type; returns the placeholder.
    fn push_for(&mut self, col: &ColumnDef, v: Value) -> String {
        let n = self.push_param(v);
        col.placeholder(n)
    }
}

/// Equality restriction added on top of the plan (ownership scope).
#[derive(Clone, Debug)]
pub struct Scope<'a> {
    pub column: &'a str,
    pub value: Value,
}

fn column_expr(col: &ColumnDef, alias: Option<&str>) -> String {
    let q = match alias {
        Some(a) => format!("{}.{}", a, quoted(&col.name)),
        None => quoted(&col.name),
    };
    if col.decodes_natively() {
        q
    } else {
        format!("{}::text", q)
    }
}

/// SELECT list: natively decodable columns as-is, everything else cast to text.
fn select_column_list(columns: &[&ColumnDef], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| format!("{} AS {}", column_expr(c, alias), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn all_columns(entity: &EntityDefinition) -> Vec<&ColumnDef> {
    entity.columns.iter().collect()
}

/// Columns kept by the projection. An inclusion list naming no real column means all columns.
pub fn projected_columns<'a>(entity: &'a EntityDefinition, projection: &Projection) -> Vec<&'a ColumnDef> {
    match projection {
        Projection::All => all_columns(entity),
        Projection::Include(fields) => {
            let mut seen = HashSet::new();
            let cols: Vec<&ColumnDef> = fields
                .iter()
                .filter_map(|f| entity.resolve_column(f))
                .filter(|c| seen.insert(c.name.as_str()))
                .collect();
            if cols.is_empty() {
                all_columns(entity)
            } else {
                cols
            }
        }
        Projection::Exclude(fields) => {
            let excluded: HashSet<&str> = fields
                .iter()
                .filter_map(|f| entity.resolve_column(f))
                .map(|c| c.name.as_str())
                .collect();
            entity.columns.iter().filter(|c| !excluded.contains(c.name.as_str())).collect()
        }
    }
}

/// `lhs op $n`. A value the column cannot hold matches no row; `<>` against it matches every non-null row.
fn compare(q: &mut QueryBuf, col: &ColumnDef, lhs: &str, op: &str, raw: &str) -> String {
    match col.column_type.coerce(raw) {
        Some(v) => format!("{} {} {}", lhs, op, q.push_for(col, v)),
        None if op == "<>" => format!("{} IS NOT NULL", lhs),
        None => NO_MATCH.to_string(),
    }
}

/// WHERE clause for filters, search and scope; fields that are not columns are skipped.
fn where_clause(q: &mut QueryBuf, entity: &EntityDefinition, plan: &QueryPlan, scope: Option<&Scope<'_>>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (field, predicates) in &plan.filters {
        let Some(col) = entity.resolve_column(field) else {
            continue;
        };
        let lhs = format!("{}.{}", MAIN_ALIAS, quoted(&col.name));
        for p in predicates {
            let part = match p {
                Predicate::Eq(v) => compare(q, col, &lhs, "=", v),
                Predicate::Gte(v) => compare(q, col, &lhs, ">=", v),
                Predicate::Lte(v) => compare(q, col, &lhs, "<=", v),
                Predicate::Ne(v) => compare(q, col, &lhs, "<>", v),
                Predicate::In(values) => {
                    let phs: Vec<String> = values
                        .iter()
                        .filter_map(|v| col.column_type.coerce(v))
                        .map(|v| q.push_for(col, v))
                        .collect();
                    if phs.is_empty() {
                        NO_MATCH.to_string()
                    } else {
                        format!("{} IN ({})", lhs, phs.join(", "))
                    }
                }
                Predicate::Like(pattern) => {
                    let n = q.push_param(Value::String(pattern.clone()));
                    format!("{}::text ILIKE ${}", lhs, n)
                }
            };
            parts.push(part);
        }
    }
    if let Some(search) = &plan.search {
        let cols: Vec<&ColumnDef> = search.fields.iter().filter_map(|f| entity.column(f)).collect();
        if !cols.is_empty() {
            let n = q.push_param(Value::String(search.pattern.clone()));
            let ors: Vec<String> = cols
                .iter()
                .map(|c| format!("{}.{}::text ILIKE ${}", MAIN_ALIAS, quoted(&c.name), n))
                .collect();
            parts.push(format!("({})", ors.join(" OR ")));
        }
    }
    if let Some(scope) = scope {
        if let Some(col) = entity.column(scope.column) {
            let ph = q.push_for(col, scope.value.clone());
            parts.push(format!("{}.{} = {}", MAIN_ALIAS, quoted(&col.name), ph));
        } else {
            // Scope on a missing column must not widen the result.
            parts.push(NO_MATCH.into());
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn order_clause(entity: &EntityDefinition, plan: &QueryPlan) -> String {
    let mut seen = HashSet::new();
    let mut keys: Vec<String> = plan
        .sort
        .iter()
        .filter_map(|(field, dir)| entity.resolve_column(field).map(|c| (c, dir)))
        .filter(|(c, _)| seen.insert(c.name.clone()))
        .map(|(c, dir)| format!("{}.{} {}", MAIN_ALIAS, quoted(&c.name), dir.as_sql()))
        .collect();
    // Primary key breaks ties so pages are stable.
    if entity.primary_key_column().is_some() && !seen.contains(&entity.primary_key) {
        keys.push(format!(
            "{}.{} {}",
            MAIN_ALIAS,
            quoted(&entity.primary_key),
            SortDirection::Asc.as_sql()
        ));
    }
    if keys.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", keys.join(", "))
    }
}

/// SELECT COUNT(*) over the plan's filters and scope.
pub fn count(entity: &EntityDefinition, plan: &QueryPlan, scope: Option<&Scope<'_>>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, entity, plan, scope);
    q.sql = format!("SELECT COUNT(*) AS total FROM {} {}{}", entity_table(entity), MAIN_ALIAS, where_sql);
    q
}

/// SELECT one page: projection, joined includes as scalar row_to_json subqueries, order, window.
pub fn select_page(entity: &EntityDefinition, plan: &QueryPlan, window: &PageWindow, scope: Option<&Scope<'_>>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut select_parts = vec![select_column_list(&projected_columns(entity, &plan.projection), Some(MAIN_ALIAS))];
    for assoc in &plan.joins {
        let related = &assoc.target;
        let sub = format!(
            "(SELECT row_to_json(sub) FROM (SELECT * FROM {} WHERE {} = {}.{} LIMIT 1) sub) AS {}",
            entity_table(related),
            quoted(&assoc.referenced_column),
            MAIN_ALIAS,
            quoted(&assoc.foreign_key_column),
            quoted(&assoc.alias)
        );
        select_parts.push(sub);
    }
    let where_sql = where_clause(&mut q, entity, plan, scope);
    q.sql = format!(
        "SELECT {} FROM {} {}{}{} LIMIT {} OFFSET {}",
        select_parts.join(", "),
        entity_table(entity),
        MAIN_ALIAS,
        where_sql,
        order_clause(entity, plan),
        window.limit,
        window.offset
    );
    q
}

/// sum/avg need a numeric column; min/max need an orderable one.
fn aggregate_applies(func: &str, ty: ColumnType) -> bool {
    match func {
        "sum" | "avg" => ty.is_numeric(),
        "min" | "max" => !matches!(ty, ColumnType::Boolean | ColumnType::String),
        _ => true,
    }
}

/// Aggregates over the filtered set as one JSON object keyed `func(column)`.
/// Unknown functions or columns are dropped; returns None when nothing is left.
pub fn aggregate(entity: &EntityDefinition, plan: &QueryPlan, scope: Option<&Scope<'_>>) -> Option<QueryBuf> {
    let mut q = QueryBuf::new();
    let mut pairs = Vec::new();
    for agg in &plan.aggregates {
        let func = agg.function.to_lowercase();
        if !AGGREGATE_FUNCTIONS.contains(&func.as_str()) {
            continue;
        }
        let expr = if agg.column == "*" {
            if func != "count" {
                continue;
            }
            "*".to_string()
        } else {
            match entity.resolve_column(&agg.column) {
                Some(c) if aggregate_applies(&func, c.column_type) => format!("{}.{}", MAIN_ALIAS, quoted(&c.name)),
                _ => continue,
            }
        };
        let key = q.push_param(Value::String(format!("{}({})", func, agg.column)));
        pairs.push(format!("${}::text, {}({})", key, func.to_uppercase(), expr));
    }
    if pairs.is_empty() {
        return None;
    }
    let where_sql = where_clause(&mut q, entity, plan, scope);
    q.sql = format!(
        "SELECT json_build_object({}) AS aggregates FROM {} {}{}",
        pairs.join(", "),
        entity_table(entity),
        MAIN_ALIAS,
        where_sql
    );
    Some(q)
}

/// SELECT by primary key; id is the sole param.
pub fn select_by_id(entity: &EntityDefinition, id: Value) -> QueryBuf {
    select_by_column(entity, &entity.primary_key, id, false)
}

/// SELECT rows where `column = value`, optionally locking them for the enclosing transaction.
pub fn select_by_column(entity: &EntityDefinition, column: &str, value: Value, for_update: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = match entity.column(column) {
        Some(c) => q.push_for(c, value),
        None => format!("${}", q.push_param(value)),
    };
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = {}{}",
        select_column_list(&all_columns(entity), Some(MAIN_ALIAS)),
        entity_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(column),
        ph,
        if for_update { " FOR UPDATE" } else { "" }
    );
    q
}

/// Body restricted to real columns, in entity column order.
fn body_columns<'a>(entity: &'a EntityDefinition, body: &'a Map<String, Value>) -> Vec<(&'a ColumnDef, &'a Value)> {
    entity
        .columns
        .iter()
        .filter_map(|c| body.get(&c.name).map(|v| (c, v)))
        .collect()
}

/// INSERT the body's columns; timestamps default to NOW() when the body omits them.
pub fn insert(entity: &EntityDefinition, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for (c, v) in body_columns(entity, body) {
        if c.is_primary_key && c.is_auto_increment && v.is_null() {
            continue;
        }
        cols.push(quoted(&c.name));
        values.push(q.push_for(c, v.clone()));
    }
    for c in [entity.created_column(), entity.updated_column()].into_iter().flatten() {
        if !body.contains_key(&c.name) {
            cols.push(quoted(&c.name));
            values.push("NOW()".to_string());
        }
    }
    let returning = select_column_list(&all_columns(entity), None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", entity_table(entity), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            entity_table(entity),
            cols.join(", "),
            values.join(", "),
            returning
        )
    };
    q
}

/// SET clause over the body's columns minus `protected`, plus the update timestamp.
fn set_clause(q: &mut QueryBuf, entity: &EntityDefinition, body: &Map<String, Value>, protected: &[&str]) -> Vec<String> {
    let mut sets = Vec::new();
    let updated = entity.updated_column();
    for (c, v) in body_columns(entity, body) {
        if c.is_primary_key || protected.contains(&c.name.as_str()) {
            continue;
        }
        if updated.map(|u| u.name == c.name).unwrap_or(false) {
            continue;
        }
        let ph = q.push_for(c, v.clone());
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    if let Some(u) = updated {
        sets.push(format!("{} = NOW()", quoted(&u.name)));
    }
    sets
}

/// UPDATE rows matching every (column, value) in `keys`. With nothing to set, selects the
/// matching rows instead so "no row matched" is still observable.
pub fn update_where(entity: &EntityDefinition, body: &Map<String, Value>, keys: &[(&str, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let protected: Vec<&str> = keys.iter().map(|(c, _)| *c).collect();
    let sets = set_clause(&mut q, entity, body, &protected);
    let conds: Vec<String> = keys
        .iter()
        .map(|(column, value)| {
            let ph = match entity.column(column) {
                Some(c) => q.push_for(c, value.clone()),
                None => format!("${}", q.push_param(value.clone())),
            };
            format!("{} = {}", quoted(column), ph)
        })
        .collect();
    let returning = select_column_list(&all_columns(entity), None);
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {}",
            returning,
            entity_table(entity),
            conds.join(" AND ")
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            entity_table(entity),
            sets.join(", "),
            conds.join(" AND "),
            returning
        )
    };
    q
}

/// DELETE rows matching every (column, value) in `keys`.
pub fn delete_where(entity: &EntityDefinition, keys: &[(&str, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let conds: Vec<String> = keys
        .iter()
        .map(|(column, value)| {
            let ph = match entity.column(column) {
                Some(c) => q.push_for(c, value.clone()),
                None => format!("${}", q.push_param(value.clone())),
            };
            format!("{} = {}", quoted(column), ph)
        })
        .collect();
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        entity_table(entity),
        conds.join(" AND "),
        select_column_list(&all_columns(entity), None)
    );
    q
}
