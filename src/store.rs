//! RBAC table DDL and database bootstrap. Tables live in the configured schema, next to the entities.

use crate::config::Settings;
use crate::error::AppError;
use crate::sql::{qualified_table, quoted};
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::str::FromStr;

pub const ROLES_TABLE: &str = "roles";
pub const PERMISSIONS_TABLE: &str = "permissions";
pub const RESOURCES_TABLE: &str = "resources";
pub const USER_ROLES_TABLE: &str = "user_roles";
pub const ROLE_PERMISSIONS_TABLE: &str = "role_permissions";
pub const PERMISSION_RESOURCES_TABLE: &str = "permission_resources";

/// Resolve an identity to the user's external id. The identity may be the internal id or the
/// external id; an exact external-id match wins when both name different users.
pub fn user_lookup_sql(schema: &str, users_table: &str, external_id_field: &str) -> String {
    let ext = quoted(external_id_field);
    format!(
        "SELECT {ext}::text FROM {} WHERE id::text = $1 OR {ext}::text = $1 \
         ORDER BY ({ext}::text = $1) DESC LIMIT 1",
        qualified_table(schema, users_table)
    )
}

/// Create the schema, the users table and the RBAC graph tables when absent.
pub async fn ensure_rbac_tables(pool: &PgPool, settings: &Settings) -> Result<(), AppError> {
    let schema = &settings.db_schema;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;

    let users = qualified_table(schema, &settings.users_table);
    let ext = quoted(&settings.external_id_field);
    let roles = qualified_table(schema, ROLES_TABLE);
    let permissions = qualified_table(schema, PERMISSIONS_TABLE);
    let resources = qualified_table(schema, RESOURCES_TABLE);

    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {users} (
                id SERIAL PRIMARY KEY,
                {ext} VARCHAR(64) NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {roles} (
                role_id SERIAL PRIMARY KEY,
                role_name VARCHAR(100) NOT NULL UNIQUE,
                description TEXT,
                is_system_role BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {permissions} (
                permission_id SERIAL PRIMARY KEY,
                permission_name VARCHAR(100) NOT NULL UNIQUE,
                description TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {resources} (
                id SERIAL PRIMARY KEY,
                resource_name VARCHAR(100) NOT NULL UNIQUE,
                resource_type VARCHAR(20) NOT NULL CHECK (resource_type IN ('API_ENDPOINT', 'BROWSER_ROUTE')),
                resource_path VARCHAR(255) NOT NULL,
                http_method VARCHAR(10) NOT NULL DEFAULT 'ALL'
                    CHECK (http_method IN ('GET', 'POST', 'PUT', 'DELETE', 'ALL')),
                description TEXT,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (resource_path, http_method, resource_type)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL REFERENCES {users} ({ext}) ON DELETE CASCADE,
                role_id INT NOT NULL REFERENCES {roles} (role_id) ON DELETE CASCADE,
                UNIQUE (user_id, role_id)
            )
            "#,
            qualified_table(schema, USER_ROLES_TABLE)
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                role_id INT NOT NULL REFERENCES {roles} (role_id) ON DELETE CASCADE,
                permission_id INT NOT NULL REFERENCES {permissions} (permission_id) ON DELETE CASCADE,
                UNIQUE (role_id, permission_id)
            )
            "#,
            qualified_table(schema, ROLE_PERMISSIONS_TABLE)
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                permission_id INT NOT NULL REFERENCES {permissions} (permission_id) ON DELETE CASCADE,
                resource_name VARCHAR(100) NOT NULL REFERENCES {resources} (resource_name)
                    ON DELETE CASCADE ON UPDATE CASCADE,
                UNIQUE (permission_id, resource_name)
            )
            "#,
            qualified_table(schema, PERMISSION_RESOURCES_TABLE)
        ),
    ];
    for ddl in statements.iter() {
        sqlx::query(ddl).execute(pool).await?;
    }
    tracing::info!(schema = %schema, "rbac tables ready");
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

/// Split a connection URL into (url of the `postgres` admin database, database name).
fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let (db_name, query) = match path_and_query.split_once('?') {
        Some((name, q)) => (name.trim(), Some(q)),
        None => (path_and_query.trim(), None),
    };
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = match query {
        Some(q) => format!("{}postgres?{}", base, q),
        None => format!("{}postgres", base),
    };
    Ok((admin_url, db_name.to_string()))
}
