//! Structured query plan produced from raw request parameters.

use crate::schema::Association;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Eq(String),
    Gte(String),
    Lte(String),
    Ne(String),
    In(Vec<String>),
    /// LIKE pattern, already wrapped in `%`.
    Like(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// Free-text search: OR of substring matches over `fields`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchClause {
    pub pattern: String,
    pub fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub function: String,
    pub column: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub offset: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Effective window after looking at the total row count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

impl Pagination {
    /// Clamp an overshooting window onto the last page when rows exist.
    pub fn window(&self, total_items: u64) -> PageWindow {
        let limit = self.limit.max(1);
        let total_pages = total_items.div_ceil(limit);
        let requested_page = self.offset / limit + 1;
        let offset = if total_items > 0 && requested_page > total_pages {
            (total_pages - 1) * limit
        } else {
            self.offset
        };
        PageWindow {
            limit,
            offset,
            current_page: offset / limit + 1,
            total_pages,
            total_items,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryPlan {
    /// field -> predicates, ANDed.
    pub filters: BTreeMap<String, Vec<Predicate>>,
    pub search: Option<SearchClause>,
    pub sort: Vec<(String, SortDirection)>,
    pub projection: Projection,
    pub pagination: Pagination,
    pub aggregates: Vec<Aggregate>,
    pub joins: Vec<Association>,
    /// The raw parameters as an object, echoed back as response filters.
    pub raw: Map<String, Value>,
}

impl Default for QueryPlan {
    fn default() -> Self {
        QueryPlan {
            filters: BTreeMap::new(),
            search: None,
            sort: Vec::new(),
            projection: Projection::All,
            pagination: Pagination::default(),
            aggregates: Vec::new(),
            joins: Vec::new(),
            raw: Map::new(),
        }
    }
}

impl QueryPlan {
    pub fn join_aliases(&self) -> Vec<&str> {
        self.joins.iter().map(|a| a.alias.as_str()).collect()
    }
}
