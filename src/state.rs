//! Shared application state for all routes. Everything in it is immutable after startup.

use crate::auth::PermissionResolver;
use crate::config::Settings;
use crate::schema::EntityRegistry;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Built once by introspection before the router exists.
    pub registry: Arc<EntityRegistry>,
    pub settings: Arc<Settings>,
    pub permissions: PermissionResolver,
}
