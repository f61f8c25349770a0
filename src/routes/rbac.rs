//! RBAC management routes. Every route is gated by the permission resolver.

use crate::auth::authorize;
use crate::handlers::rbac::*;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, put},
    Router,
};

pub fn rbac_routes(state: AppState) -> Router {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:id", put(update_role).delete(delete_role))
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:id", put(update_permission).delete(delete_permission))
        .route("/resources", get(list_resources).post(create_resource))
        .route("/resources/:id", put(update_resource).delete(delete_resource))
        .route("/browser/resources", get(list_browser_resources))
        .route("/users/:user_id/roles", get(user_roles).post(assign_user_roles))
        .route("/roles/:id/permissions", get(role_permissions).post(assign_role_permissions))
        .route(
            "/permissions/:id/resources",
            get(permission_resources).post(assign_permission_resources),
        )
        .route("/user/endpoints", get(user_endpoints))
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize))
        .with_state(state)
}
