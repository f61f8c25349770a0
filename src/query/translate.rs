//! Translate the untyped query-string bag into a `QueryPlan`. Never fails; bad input degrades to defaults.

use crate::query::plan::*;
use crate::schema::Association;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Keys that steer the query and never become filters.
pub const CONTROL_KEYS: [&str; 10] = [
    "page",
    "limit",
    "sortBy",
    "sortOrder",
    "sort",
    "fields",
    "excludedFields",
    "q",
    "offset",
    "include",
];

const SEARCH_FIELDS: [&str; 2] = ["name", "description"];

/// Last non-empty value of `key`.
fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.as_str())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn translate(params: &[(String, String)], associations: &HashMap<String, Association>) -> QueryPlan {
    QueryPlan {
        filters: filters(params),
        search: search(params),
        sort: sorting(params),
        projection: projection(params),
        pagination: pagination(params),
        aggregates: aggregates(params),
        joins: joins(params, associations),
        raw: raw_object(params),
    }
}

pub fn filters(params: &[(String, String)]) -> std::collections::BTreeMap<String, Vec<Predicate>> {
    let mut out: std::collections::BTreeMap<String, Vec<Predicate>> = Default::default();
    for (key, value) in params {
        if CONTROL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let ranged = [("[gte]", 0u8), ("[lte]", 1), ("[ne]", 2), ("[in]", 3)]
            .iter()
            .find_map(|(suffix, op)| key.strip_suffix(suffix).map(|field| (field, *op)));
        if let Some((field, op)) = ranged {
            if field.is_empty() {
                continue;
            }
            let predicate = match op {
                0 => Predicate::Gte(value.clone()),
                1 => Predicate::Lte(value.clone()),
                2 => Predicate::Ne(value.clone()),
                _ => Predicate::In(value.split(',').map(|v| v.trim().to_string()).collect()),
            };
            out.entry(field.to_string()).or_default().push(predicate);
        } else if key == "name_like" {
            out.insert("name".into(), vec![Predicate::Like(format!("%{}%", value))]);
        } else if !key.contains('[') && !key.contains(']') {
            out.insert(key.clone(), vec![Predicate::Eq(value.clone())]);
        }
    }
    out
}

pub fn search(params: &[(String, String)]) -> Option<SearchClause> {
    param(params, "q").map(|q| SearchClause {
        pattern: format!("%{}%", q),
        fields: SEARCH_FIELDS.iter().map(|s| s.to_string()).collect(),
    })
}

pub fn sorting(params: &[(String, String)]) -> Vec<(String, SortDirection)> {
    if let (Some(by), Some(order)) = (param(params, "sortBy"), param(params, "sortOrder")) {
        let dir = if order.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        return vec![(by.to_string(), dir)];
    }
    let Some(sort) = param(params, "sort") else {
        return Vec::new();
    };
    split_list(sort)
        .into_iter()
        .filter_map(|f| match f.strip_prefix('-') {
            Some(field) if !field.is_empty() => Some((field.to_string(), SortDirection::Desc)),
            Some(_) => None,
            None => Some((f, SortDirection::Asc)),
        })
        .collect()
}

pub fn projection(params: &[(String, String)]) -> Projection {
    if let Some(fields) = param(params, "fields") {
        return Projection::Include(split_list(fields));
    }
    if let Some(excluded) = param(params, "excludedFields") {
        return Projection::Exclude(split_list(excluded));
    }
    Projection::All
}

fn positive_or(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.max(1) as u64)
        .unwrap_or(default)
}

pub fn pagination(params: &[(String, String)]) -> Pagination {
    let page = positive_or(param(params, "page"), DEFAULT_PAGE);
    let limit = positive_or(param(params, "limit"), DEFAULT_LIMIT).min(MAX_LIMIT);
    let explicit_offset = param(params, "offset")
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.max(0) as u64);
    let offset = explicit_offset
        .unwrap_or_else(|| (page - 1).saturating_mul(limit))
        .min(i64::MAX as u64);
    Pagination { page, limit, offset }
}

pub fn aggregates(params: &[(String, String)]) -> Vec<Aggregate> {
    let Some(raw) = param(params, "aggregate") else {
        return Vec::new();
    };
    raw.split(',')
        .filter_map(|entry| {
            let (func, rest) = entry.split_once('(')?;
            let column = rest.replace(')', "");
            let (func, column) = (func.trim(), column.trim());
            if func.is_empty() || column.is_empty() {
                return None;
            }
            Some(Aggregate {
                function: func.to_string(),
                column: column.to_string(),
            })
        })
        .collect()
}

pub fn joins(params: &[(String, String)], associations: &HashMap<String, Association>) -> Vec<Association> {
    let Some(include) = param(params, "include") else {
        return Vec::new();
    };
    split_list(include)
        .iter()
        .filter_map(|alias| associations.get(alias).cloned())
        .collect()
}

fn raw_object(params: &[(String, String)]) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}
