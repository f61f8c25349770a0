//! Common routes: health, readiness, version.

use crate::response::ApiResponse;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::ok("ok", None))
}

/// 200 when the database answers, 503 otherwise.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse>) {
    match sqlx::query("SELECT 1").fetch_optional(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                "ready",
                Some(json!({ "database": "ok", "entities": state.registry.len() })),
            )),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("database unavailable", StatusCode::SERVICE_UNAVAILABLE)),
            )
        }
    }
}

async fn version() -> Json<ApiResponse> {
    Json(ApiResponse::ok(
        "version",
        Some(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    ))
}

/// GET /health and GET /version; no state needed.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// Common routes plus GET /ready with a database check.
pub fn common_routes_with_ready(state: AppState) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .with_state(state)
        .merge(common_routes())
}
