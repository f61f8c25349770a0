//! Read side of the role -> permission -> resource graph.

use crate::config::Settings;
use crate::error::AppError;
use crate::sql::qualified_table;
use crate::store::{
    user_lookup_sql, PERMISSION_RESOURCES_TABLE, RESOURCES_TABLE, ROLE_PERMISSIONS_TABLE, USER_ROLES_TABLE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

pub const API_ENDPOINT: &str = "API_ENDPOINT";
pub const BROWSER_ROUTE: &str = "BROWSER_ROUTE";
/// Resource method matching every request method.
pub const ANY_METHOD: &str = "ALL";

/// A row of the resources table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub id: i32,
    pub resource_name: String,
    pub resource_type: String,
    pub resource_path: String,
    pub http_method: String,
    pub description: Option<String>,
    pub is_public: bool,
}

impl Resource {
    pub fn matches(&self, paths: &[String], method: &str) -> bool {
        paths.iter().any(|p| *p == self.resource_path)
            && (self.http_method == ANY_METHOD || self.http_method == method)
    }
}

/// Data access the permission resolver needs. Errors are data-layer failures, never denials.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Whether a public resource matches any of `paths` for `method` (or ALL).
    async fn public_resource_exists(&self, paths: &[String], method: &str) -> Result<bool, AppError>;

    /// External id of the user identified by `identity` (internal id or external id).
    async fn find_user(&self, identity: &str) -> Result<Option<String>, AppError>;

    async fn role_ids(&self, external_id: &str) -> Result<Vec<i32>, AppError>;

    async fn permission_ids(&self, role_ids: &[i32]) -> Result<Vec<i32>, AppError>;

    /// Resources granted by `permission_ids`; restricted to (paths, method) when given.
    async fn resources(
        &self,
        permission_ids: &[i32],
        filter: Option<(&[String], &str)>,
    ) -> Result<Vec<Resource>, AppError>;
}

/// PostgreSQL-backed store over the RBAC tables of the configured schema.
#[derive(Clone)]
pub struct PgPermissionStore {
    pool: PgPool,
    schema: String,
    users_table: String,
    external_id_field: String,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool, settings: &Settings) -> Self {
        PgPermissionStore {
            pool,
            schema: settings.db_schema.clone(),
            users_table: settings.users_table.clone(),
            external_id_field: settings.external_id_field.clone(),
        }
    }

    fn table(&self, name: &str) -> String {
        qualified_table(&self.schema, name)
    }
}

const RESOURCE_COLUMNS: &str =
    "r.id, r.resource_name, r.resource_type, r.resource_path, r.http_method, r.description, r.is_public";

#[async_trait]
impl PermissionStore for PgPermissionStore {
    async fn public_resource_exists(&self, paths: &[String], method: &str) -> Result<bool, AppError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE is_public AND resource_path = ANY($1) \
             AND (http_method = $2 OR http_method = '{}'))",
            self.table(RESOURCES_TABLE),
            ANY_METHOD
        );
        let found: bool = sqlx::query_scalar(&sql).bind(paths).bind(method).fetch_one(&self.pool).await?;
        Ok(found)
    }

    async fn find_user(&self, identity: &str) -> Result<Option<String>, AppError> {
        let sql = user_lookup_sql(&self.schema, &self.users_table, &self.external_id_field);
        let found: Option<Option<String>> = sqlx::query_scalar(&sql).bind(identity).fetch_optional(&self.pool).await?;
        Ok(found.flatten())
    }

    async fn role_ids(&self, external_id: &str) -> Result<Vec<i32>, AppError> {
        let sql = format!("SELECT role_id FROM {} WHERE user_id = $1", self.table(USER_ROLES_TABLE));
        Ok(sqlx::query_scalar(&sql).bind(external_id).fetch_all(&self.pool).await?)
    }

    async fn permission_ids(&self, role_ids: &[i32]) -> Result<Vec<i32>, AppError> {
        let sql = format!(
            "SELECT DISTINCT permission_id FROM {} WHERE role_id = ANY($1)",
            self.table(ROLE_PERMISSIONS_TABLE)
        );
        Ok(sqlx::query_scalar(&sql).bind(role_ids).fetch_all(&self.pool).await?)
    }

    async fn resources(
        &self,
        permission_ids: &[i32],
        filter: Option<(&[String], &str)>,
    ) -> Result<Vec<Resource>, AppError> {
        let base = format!(
            "SELECT DISTINCT {} FROM {} r JOIN {} pr ON r.resource_name = pr.resource_name \
             WHERE pr.permission_id = ANY($1)",
            RESOURCE_COLUMNS,
            self.table(RESOURCES_TABLE),
            self.table(PERMISSION_RESOURCES_TABLE)
        );
        let rows = match filter {
            Some((paths, method)) => {
                let sql = format!(
                    "{} AND r.resource_path = ANY($2) AND (r.http_method = $3 OR r.http_method = '{}') ORDER BY r.id",
                    base, ANY_METHOD
                );
                sqlx::query_as::<_, Resource>(&sql)
                    .bind(permission_ids)
                    .bind(paths)
                    .bind(method)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{} ORDER BY r.id", base);
                sqlx::query_as::<_, Resource>(&sql)
                    .bind(permission_ids)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }
}

/// In-memory store for tests and embedding without a database.
#[derive(Clone, Debug, Default)]
pub struct MemoryPermissionStore {
    /// (internal id, external id)
    pub users: Vec<(String, String)>,
    /// (external id, role id)
    pub user_roles: Vec<(String, i32)>,
    /// (role id, permission id)
    pub role_permissions: Vec<(i32, i32)>,
    /// (permission id, resource name)
    pub permission_resources: Vec<(i32, String)>,
    pub resources: Vec<Resource>,
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn public_resource_exists(&self, paths: &[String], method: &str) -> Result<bool, AppError> {
        Ok(self.resources.iter().any(|r| r.is_public && r.matches(paths, method)))
    }

    async fn find_user(&self, identity: &str) -> Result<Option<String>, AppError> {
        let by_ext = self.users.iter().find(|(_, ext)| ext == identity);
        Ok(by_ext
            .or_else(|| self.users.iter().find(|(id, _)| id == identity))
            .map(|(_, ext)| ext.clone()))
    }

    async fn role_ids(&self, external_id: &str) -> Result<Vec<i32>, AppError> {
        Ok(self
            .user_roles
            .iter()
            .filter(|(u, _)| u == external_id)
            .map(|(_, r)| *r)
            .collect())
    }

    async fn permission_ids(&self, role_ids: &[i32]) -> Result<Vec<i32>, AppError> {
        let mut ids: Vec<i32> = self
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .map(|(_, p)| *p)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn resources(
        &self,
        permission_ids: &[i32],
        filter: Option<(&[String], &str)>,
    ) -> Result<Vec<Resource>, AppError> {
        let granted: Vec<&str> = self
            .permission_resources
            .iter()
            .filter(|(p, _)| permission_ids.contains(p))
            .map(|(_, name)| name.as_str())
            .collect();
        Ok(self
            .resources
            .iter()
            .filter(|r| granted.contains(&r.resource_name.as_str()))
            .filter(|r| filter.map(|(paths, method)| r.matches(paths, method)).unwrap_or(true))
            .cloned()
            .collect())
    }
}
