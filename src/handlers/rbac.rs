//! RBAC management API: roles, permissions, resources and their assignments.
//! Request bodies accept camelCase or snake_case keys.

use crate::auth::store::{Resource, ANY_METHOD, API_ENDPOINT, BROWSER_ROUTE};
use crate::case::object_keys_to_snake_case;
use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::response::{success_created, success_ok};
use crate::service::CrudService;
use crate::sql::qualified_table;
use crate::state::AppState;
use crate::store::{
    PERMISSIONS_TABLE, PERMISSION_RESOURCES_TABLE, RESOURCES_TABLE, ROLES_TABLE, ROLE_PERMISSIONS_TABLE,
    USER_ROLES_TABLE,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", ANY_METHOD];

#[derive(Debug, Serialize, FromRow)]
pub struct Role {
    pub role_id: i32,
    pub role_name: String,
    pub description: Option<String>,
    pub is_system_role: bool,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Permission {
    pub permission_id: i32,
    pub permission_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleInput {
    pub role_name: Option<String>,
    pub description: Option<String>,
    pub is_system_role: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionInput {
    pub permission_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceInput {
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
    pub resource_path: Option<String>,
    pub http_method: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

impl ResourceInput {
    /// Uppercase and check type and method when present.
    fn normalized(mut self) -> Result<Self, AppError> {
        if let Some(t) = self.resource_type.as_mut() {
            *t = t.trim().to_uppercase();
            if t != API_ENDPOINT && t != BROWSER_ROUTE {
                return Err(AppError::Validation(format!(
                    "resourceType must be {} or {}",
                    API_ENDPOINT, BROWSER_ROUTE
                )));
            }
        }
        if let Some(m) = self.http_method.as_mut() {
            *m = m.trim().to_uppercase();
            if !HTTP_METHODS.contains(&m.as_str()) {
                return Err(AppError::Validation(format!("httpMethod must be one of {}", HTTP_METHODS.join(", "))));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub role_ids: Vec<i32>,
    #[serde(default)]
    pub permission_ids: Vec<i32>,
    #[serde(default)]
    pub resource_ids: Vec<i32>,
}

/// Deserialize a body after folding its keys to snake_case.
pub fn snake_body<T: DeserializeOwned>(body: Value) -> Result<T, AppError> {
    let mut body = match body {
        Value::Object(m) => m,
        Value::Null => serde_json::Map::new(),
        _ => return Err(AppError::BadRequest("body must be a JSON object".into())),
    };
    object_keys_to_snake_case(&mut body);
    serde_json::from_value(Value::Object(body)).map_err(|e| AppError::Validation(e.to_string()))
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required", field)))
}

fn data<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn table(state: &AppState, name: &str) -> String {
    qualified_table(&state.settings.db_schema, name)
}

fn parse_id(raw: &str, what: &str) -> Result<i32, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid {} id", what)))
}

/// Distinct ids, input order kept.
fn distinct(ids: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

// roles

pub async fn list_roles(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sql = format!(
        "SELECT role_id, role_name, description, is_system_role FROM {} ORDER BY role_id",
        table(&state, ROLES_TABLE)
    );
    let roles: Vec<Role> = sqlx::query_as(&sql).fetch_all(&state.pool).await?;
    Ok(success_ok("Roles fetched successfully", data(&roles)))
}

pub async fn create_role(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let input: RoleInput = snake_body(body)?;
    let name = required(input.role_name, "roleName")?;
    let sql = format!(
        "INSERT INTO {} (role_name, description, is_system_role) VALUES ($1, $2, $3) \
         RETURNING role_id, role_name, description, is_system_role",
        table(&state, ROLES_TABLE)
    );
    let role: Role = sqlx::query_as(&sql)
        .bind(&name)
        .bind(&input.description)
        .bind(input.is_system_role.unwrap_or(false))
        .fetch_one(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Role"))?;
    tracing::info!(role = %role.role_name, "role created");
    Ok(success_created("Role created successfully", data(&role)))
}

pub async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "role")?;
    let input: RoleInput = snake_body(body)?;
    let sql = format!(
        "UPDATE {} SET role_name = COALESCE($2, role_name), description = COALESCE($3, description), \
         is_system_role = COALESCE($4, is_system_role), updated_at = NOW() WHERE role_id = $1 \
         RETURNING role_id, role_name, description, is_system_role",
        table(&state, ROLES_TABLE)
    );
    let role: Option<Role> = sqlx::query_as(&sql)
        .bind(id)
        .bind(input.role_name.filter(|s| !s.trim().is_empty()))
        .bind(&input.description)
        .bind(input.is_system_role)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Role"))?;
    let role = role.ok_or_else(|| AppError::NotFound("Role not found".into()))?;
    Ok(success_ok("Role updated successfully", data(&role)))
}

pub async fn delete_role(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "role")?;
    let roles = table(&state, ROLES_TABLE);
    let mut tx = state.pool.begin().await?;
    let system: Option<bool> = sqlx::query_scalar(&format!("SELECT is_system_role FROM {} WHERE role_id = $1 FOR UPDATE", roles))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    match system {
        None => return Err(AppError::NotFound("Role not found".into())),
        Some(true) => return Err(AppError::Forbidden("System roles cannot be deleted".into())),
        Some(false) => {}
    }
    sqlx::query(&format!("DELETE FROM {} WHERE role_id = $1", roles))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(success_ok("Role deleted successfully", None))
}

// permissions

pub async fn list_permissions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sql = format!(
        "SELECT permission_id, permission_name, description FROM {} ORDER BY permission_id",
        table(&state, PERMISSIONS_TABLE)
    );
    let permissions: Vec<Permission> = sqlx::query_as(&sql).fetch_all(&state.pool).await?;
    Ok(success_ok("Permissions fetched successfully", data(&permissions)))
}

pub async fn create_permission(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input: PermissionInput = snake_body(body)?;
    let name = required(input.permission_name, "permissionName")?;
    let sql = format!(
        "INSERT INTO {} (permission_name, description) VALUES ($1, $2) \
         RETURNING permission_id, permission_name, description",
        table(&state, PERMISSIONS_TABLE)
    );
    let permission: Permission = sqlx::query_as(&sql)
        .bind(&name)
        .bind(&input.description)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Permission"))?;
    Ok(success_created("Permission created successfully", data(&permission)))
}

pub async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "permission")?;
    let input: PermissionInput = snake_body(body)?;
    let sql = format!(
        "UPDATE {} SET permission_name = COALESCE($2, permission_name), \
         description = COALESCE($3, description), updated_at = NOW() WHERE permission_id = $1 \
         RETURNING permission_id, permission_name, description",
        table(&state, PERMISSIONS_TABLE)
    );
    let permission: Option<Permission> = sqlx::query_as(&sql)
        .bind(id)
        .bind(input.permission_name.filter(|s| !s.trim().is_empty()))
        .bind(&input.description)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Permission"))?;
    let permission = permission.ok_or_else(|| AppError::NotFound("Permission not found".into()))?;
    Ok(success_ok("Permission updated successfully", data(&permission)))
}

pub async fn delete_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "permission")?;
    let sql = format!("DELETE FROM {} WHERE permission_id = $1", table(&state, PERMISSIONS_TABLE));
    let done = sqlx::query(&sql).bind(id).execute(&state.pool).await?;
    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("Permission not found".into()));
    }
    Ok(success_ok("Permission deleted successfully", None))
}

// resources

const RESOURCE_COLUMNS: &str = "id, resource_name, resource_type, resource_path, http_method, description, is_public";

pub async fn list_resources(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {} FROM {} ORDER BY id", RESOURCE_COLUMNS, table(&state, RESOURCES_TABLE));
    let resources: Vec<Resource> = sqlx::query_as(&sql).fetch_all(&state.pool).await?;
    Ok(success_ok("Resources fetched successfully", data(&resources)))
}

pub async fn list_browser_resources(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE resource_type = $1 ORDER BY id",
        RESOURCE_COLUMNS,
        table(&state, RESOURCES_TABLE)
    );
    let resources: Vec<Resource> = sqlx::query_as(&sql).bind(BROWSER_ROUTE).fetch_all(&state.pool).await?;
    if resources.is_empty() {
        return Err(AppError::NotFound("Browser Resource not found".into()));
    }
    let routes: Vec<Value> = resources
        .iter()
        .map(|r| serde_json::json!({ "resource_path": r.resource_path, "description": r.description }))
        .collect();
    Ok(success_ok("Browser Resources fetched successfully", Some(Value::Array(routes))))
}

pub async fn create_resource(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input = snake_body::<ResourceInput>(body)?.normalized()?;
    let name = required(input.resource_name, "resourceName")?;
    let kind = required(input.resource_type, "resourceType")?;
    let path = required(input.resource_path, "resourcePath")?;
    let sql = format!(
        "INSERT INTO {} (resource_name, resource_type, resource_path, http_method, description, is_public) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        table(&state, RESOURCES_TABLE),
        RESOURCE_COLUMNS
    );
    let resource: Resource = sqlx::query_as(&sql)
        .bind(&name)
        .bind(&kind)
        .bind(&path)
        .bind(input.http_method.unwrap_or_else(|| ANY_METHOD.to_string()))
        .bind(&input.description)
        .bind(input.is_public.unwrap_or(false))
        .fetch_one(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Resource with this name or path, method and type"))?;
    tracing::info!(resource = %resource.resource_name, path = %resource.resource_path, "resource created");
    Ok(success_created("Resource created successfully", data(&resource)))
}

pub async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "resource")?;
    let input = snake_body::<ResourceInput>(body)?.normalized()?;
    let sql = format!(
        "UPDATE {} SET resource_name = COALESCE($2, resource_name), resource_type = COALESCE($3, resource_type), \
         resource_path = COALESCE($4, resource_path), http_method = COALESCE($5, http_method), \
         description = COALESCE($6, description), is_public = COALESCE($7, is_public), updated_at = NOW() \
         WHERE id = $1 RETURNING {}",
        table(&state, RESOURCES_TABLE),
        RESOURCE_COLUMNS
    );
    let resource: Option<Resource> = sqlx::query_as(&sql)
        .bind(id)
        .bind(input.resource_name.filter(|s| !s.trim().is_empty()))
        .bind(&input.resource_type)
        .bind(input.resource_path.filter(|s| !s.trim().is_empty()))
        .bind(&input.http_method)
        .bind(&input.description)
        .bind(input.is_public)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| AppError::from_write(e, "Resource with this name or path, method and type"))?;
    let resource = resource.ok_or_else(|| AppError::NotFound("Resource not found".into()))?;
    Ok(success_ok("Resource updated successfully", data(&resource)))
}

pub async fn delete_resource(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "resource")?;
    let sql = format!("DELETE FROM {} WHERE id = $1", table(&state, RESOURCES_TABLE));
    let done = sqlx::query(&sql).bind(id).execute(&state.pool).await?;
    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("Resource not found".into()));
    }
    Ok(success_ok("Resource deleted successfully", None))
}

// assignments

async fn roles_of(state: &AppState, external_id: &str) -> Result<Vec<Role>, AppError> {
    let sql = format!(
        "SELECT r.role_id, r.role_name, r.description, r.is_system_role FROM {} r \
         JOIN {} ur ON ur.role_id = r.role_id WHERE ur.user_id = $1 ORDER BY r.role_id",
        table(state, ROLES_TABLE),
        table(state, USER_ROLES_TABLE)
    );
    Ok(sqlx::query_as(&sql).bind(external_id).fetch_all(&state.pool).await?)
}

async fn user_external_id(state: &AppState, user_id: &str) -> Result<String, AppError> {
    CrudService::owner_external_id(&state.pool, &state.settings, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

async fn ensure_exists(state: &AppState, table_name: &str, id_column: &str, id: i32, what: &str) -> Result<(), AppError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1)", table(state, table_name), id_column);
    let found: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(&state.pool).await?;
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("{} not found", what)))
    }
}

/// Count of `ids` present in `table_name`; all must exist for an assignment to proceed.
async fn all_exist(state: &AppState, table_name: &str, id_column: &str, ids: &[i32], what: &str) -> Result<(), AppError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ANY($1)", table(state, table_name), id_column);
    let found: i64 = sqlx::query_scalar(&sql).bind(ids).fetch_one(&state.pool).await?;
    if found as usize != ids.len() {
        return Err(AppError::Validation(format!("One or more {} not found", what)));
    }
    Ok(())
}

/// Replace the assignment set of `owner` in one transaction.
async fn replace_assignments<T>(
    state: &AppState,
    link_table: &str,
    owner_column: &str,
    owner: T,
    member_column: &str,
    members: Vec<Value>,
    member_cast: &str,
) -> Result<(), AppError>
where
    T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + Clone + 'static,
{
    let link = table(state, link_table);
    let mut tx = state.pool.begin().await?;
    sqlx::query(&format!("DELETE FROM {} WHERE {} = $1", link, owner_column))
        .bind(owner.clone())
        .execute(&mut *tx)
        .await?;
    if !members.is_empty() {
        let sql = format!(
            "INSERT INTO {} ({}, {}) SELECT $1, m::{} FROM jsonb_array_elements_text($2) AS m",
            link, owner_column, member_column, member_cast
        );
        sqlx::query(&sql)
            .bind(owner)
            .bind(Value::Array(members))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_write(e, "Assignment"))?;
    }
    tx.commit()
        .await
        .map_err(|e| AppError::Transaction(format!("{}: {}", link_table, e)))?;
    Ok(())
}

pub async fn user_roles(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let external_id = user_external_id(&state, &user_id).await?;
    let roles = roles_of(&state, &external_id).await?;
    Ok(success_ok("User roles fetched successfully", data(&roles)))
}

pub async fn assign_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let external_id = user_external_id(&state, &user_id).await?;
    let ids = distinct(&snake_body::<Assignment>(body)?.role_ids);
    all_exist(&state, ROLES_TABLE, "role_id", &ids, "roles").await?;
    let members = ids.iter().map(|id| Value::from(*id)).collect();
    replace_assignments(&state, USER_ROLES_TABLE, "user_id", external_id.clone(), "role_id", members, "int").await?;
    tracing::info!(user = %external_id, roles = ?ids, "roles assigned");
    let roles = roles_of(&state, &external_id).await?;
    Ok(success_ok("Roles assigned to user successfully", data(&roles)))
}

async fn permissions_of(state: &AppState, role_id: i32) -> Result<Vec<Permission>, AppError> {
    let sql = format!(
        "SELECT p.permission_id, p.permission_name, p.description FROM {} p \
         JOIN {} rp ON rp.permission_id = p.permission_id WHERE rp.role_id = $1 ORDER BY p.permission_id",
        table(state, PERMISSIONS_TABLE),
        table(state, ROLE_PERMISSIONS_TABLE)
    );
    Ok(sqlx::query_as(&sql).bind(role_id).fetch_all(&state.pool).await?)
}

pub async fn role_permissions(State(state): State<AppState>, Path(role_id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let role_id = parse_id(&role_id, "role")?;
    ensure_exists(&state, ROLES_TABLE, "role_id", role_id, "Role").await?;
    let permissions = permissions_of(&state, role_id).await?;
    Ok(success_ok("Role permissions fetched successfully", data(&permissions)))
}

pub async fn assign_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let role_id = parse_id(&role_id, "role")?;
    ensure_exists(&state, ROLES_TABLE, "role_id", role_id, "Role").await?;
    let ids = distinct(&snake_body::<Assignment>(body)?.permission_ids);
    all_exist(&state, PERMISSIONS_TABLE, "permission_id", &ids, "permissions").await?;
    let members = ids.iter().map(|id| Value::from(*id)).collect();
    replace_assignments(&state, ROLE_PERMISSIONS_TABLE, "role_id", role_id, "permission_id", members, "int").await?;
    let permissions = permissions_of(&state, role_id).await?;
    Ok(success_ok("Permissions assigned to role successfully", data(&permissions)))
}

async fn resources_of(state: &AppState, permission_id: i32) -> Result<Vec<Resource>, AppError> {
    let sql = format!(
        "SELECT r.id, r.resource_name, r.resource_type, r.resource_path, r.http_method, r.description, r.is_public \
         FROM {} r JOIN {} pr ON pr.resource_name = r.resource_name WHERE pr.permission_id = $1 ORDER BY r.id",
        table(state, RESOURCES_TABLE),
        table(state, PERMISSION_RESOURCES_TABLE)
    );
    Ok(sqlx::query_as(&sql).bind(permission_id).fetch_all(&state.pool).await?)
}

pub async fn permission_resources(
    State(state): State<AppState>,
    Path(permission_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let permission_id = parse_id(&permission_id, "permission")?;
    ensure_exists(&state, PERMISSIONS_TABLE, "permission_id", permission_id, "Permission").await?;
    let resources = resources_of(&state, permission_id).await?;
    Ok(success_ok("Permission resources fetched successfully", data(&resources)))
}

pub async fn assign_permission_resources(
    State(state): State<AppState>,
    Path(permission_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let permission_id = parse_id(&permission_id, "permission")?;
    ensure_exists(&state, PERMISSIONS_TABLE, "permission_id", permission_id, "Permission").await?;
    let ids = distinct(&snake_body::<Assignment>(body)?.resource_ids);
    let sql = format!(
        "SELECT resource_name FROM {} WHERE id = ANY($1) ORDER BY id",
        table(&state, RESOURCES_TABLE)
    );
    let names: Vec<String> = sqlx::query_scalar(&sql).bind(&ids).fetch_all(&state.pool).await?;
    if names.len() != ids.len() {
        return Err(AppError::Validation("One or more resources not found".into()));
    }
    let members = names.into_iter().map(Value::String).collect();
    replace_assignments(
        &state,
        PERMISSION_RESOURCES_TABLE,
        "permission_id",
        permission_id,
        "resource_name",
        members,
        "text",
    )
    .await?;
    let resources = resources_of(&state, permission_id).await?;
    Ok(success_ok("Resources assigned to permission successfully", data(&resources)))
}

/// Everything the caller may reach, split into API endpoints and browser routes.
pub async fn user_endpoints(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity.ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;
    let found = state.permissions.permitted_resources(&identity).await?;
    Ok(success_ok("User endpoints fetched successfully", data(&found)))
}
