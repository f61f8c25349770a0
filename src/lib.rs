//! crudgate: schema-introspected generic CRUD API with role-based access control.

pub mod auth;
pub mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod query;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{PermissionResolver, PgPermissionStore};
pub use config::{validate_settings, Settings};
pub use error::{AppError, SchemaError};
pub use response::ApiResponse;
pub use routes::{common_routes, common_routes_with_ready, entity_routes, rbac_routes};
pub use schema::{load_entities, EntityRegistry};
pub use service::CrudService;
pub use state::AppState;
pub use store::{ensure_database_exists, ensure_rbac_tables};
