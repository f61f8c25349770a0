//! Generic entity routes. Handlers resolve the entity from the `:resource` segment.
//! The static `/mine` segment takes priority over `/:id`.

use crate::handlers::entity::{create, delete as delete_handler, list, list_mine, read, update};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(list).post(create))
        .route("/:resource/mine", get(list_mine))
        .route("/:resource/:id", get(read).put(update).delete(delete_handler))
        .with_state(state)
}
