//! Example server: reads settings from env (and `.env`), ensures the RBAC tables exist,
//! introspects the schema, then mounts common, generic entity (/api/v1) and RBAC (/api/v2) routes.

use crudgate::{
    common_routes_with_ready, ensure_database_exists, ensure_rbac_tables, entity_routes, load_entities, rbac_routes,
    AppState, PermissionResolver, PgPermissionStore, Settings,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crudgate=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    ensure_rbac_tables(&pool, &settings).await?;
    let registry = load_entities(&pool, &settings.db_schema).await?;
    tracing::info!(entities = registry.len(), names = ?registry.names(), "schema loaded");

    let permissions = PermissionResolver::new(Arc::new(PgPermissionStore::new(pool.clone(), &settings)));
    let bind_addr = settings.bind_addr.clone();
    let body_limit = settings.body_limit_bytes;
    let state = AppState {
        pool,
        registry: Arc::new(registry),
        settings: Arc::new(settings),
        permissions,
    };

    let app = Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest("/api/v1", entity_routes(state.clone()))
        .nest("/api/v2", rbac_routes(state))
        .layer(RequestBodyLimitLayer::new(body_limit));

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
