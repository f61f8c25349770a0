//! Generic entity handlers: list, read, list-by-owner, create, update, delete.

use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::query::translate;
use crate::response::{success_created, success_ok, ApiResponse, Metadata, PaginationMeta};
use crate::schema::{resolve_associations, EntityDefinition};
use crate::service::{CreateContext, CrudService, ListPage};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{Map, Value};
use std::sync::Arc;

type Params = Vec<(String, String)>;

fn entity_for(state: &AppState, resource: &str) -> Result<Arc<EntityDefinition>, AppError> {
    state
        .registry
        .by_resource(resource)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Entity {} not found", resource)))
}

fn body_object(body: Option<Json<Value>>) -> Result<Map<String, Value>, AppError> {
    match body.map(|Json(v)| v) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m),
        Some(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// Envelope for a list page. An empty page reports "No data found" with empty filters.
pub fn list_response(page: ListPage) -> (StatusCode, Json<ApiResponse>) {
    let pagination = PaginationMeta {
        total_items: page.window.total_items,
        total_pages: page.window.total_pages,
        current_page: page.window.current_page,
        limit: page.window.limit,
    };
    let (message, filters) = if page.rows.is_empty() {
        ("No data found", Value::Object(Map::new()))
    } else {
        ("Data successfully fetched", Value::Object(page.filters))
    };
    let body = ApiResponse::ok(message, Some(Value::Array(page.rows))).with_metadata(Metadata {
        pagination,
        filters,
        aggregates: page.aggregates,
    });
    (StatusCode::OK, Json(body))
}

pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Params>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let associations = resolve_associations(&state.pool, &state.registry, &entity, &state.settings.associations).await;
    let plan = translate(&params, &associations);
    let page = CrudService::list(&state.pool, &entity, &plan, None).await?;
    Ok(list_response(page))
}

pub async fn list_mine(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(resource): Path<String>,
    Query(params): Query<Params>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let associations = resolve_associations(&state.pool, &state.registry, &entity, &state.settings.associations).await;
    let plan = translate(&params, &associations);
    let page = CrudService::list_by_owner(&state.pool, &state.settings, &entity, &plan, identity.as_deref()).await?;
    Ok(list_response(page))
}

pub async fn read(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let row = CrudService::read(&state.pool, &entity, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Data not found".into()))?;
    Ok(success_ok("Data successfully fetched", Some(row)))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(resource): Path<String>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let body = body_object(body)?;
    let associations = resolve_associations(&state.pool, &state.registry, &entity, &state.settings.associations).await;
    let ctx = CreateContext {
        settings: &state.settings,
        associations: &associations,
        identity: identity.as_deref(),
    };
    let row = CrudService::create(&state.pool, &entity, ctx, body).await?;
    Ok(success_created("Data successfully created", Some(row)))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((resource, id)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let body = body_object(body)?;
    let row = CrudService::update(&state.pool, &state.settings, &entity, &id, identity.as_deref(), body).await?;
    Ok(success_ok("Data successfully updated", Some(row)))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((resource, id)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &resource)?;
    let body = body_object(body)?;
    let row = CrudService::delete(&state.pool, &state.settings, &entity, &id, identity.as_deref(), &body).await?;
    Ok(success_ok("Data successfully deleted", Some(row)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Pagination;
    use serde_json::json;

    #[test]
    fn empty_page_reports_no_data() {
        let mut filters = Map::new();
        filters.insert("status".into(), json!("open"));
        let page = ListPage {
            rows: vec![],
            window: Pagination::default().window(0),
            filters,
            aggregates: None,
        };
        let (status, Json(body)) = list_response(page);
        assert_eq!(status, StatusCode::OK);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["message"], "No data found");
        assert_eq!(v["data"], json!([]));
        assert_eq!(v["metadata"]["filters"], json!({}));
        assert_eq!(v["metadata"]["pagination"]["totalItems"], 0);
    }

    #[test]
    fn page_metadata_reflects_window() {
        let mut filters = Map::new();
        filters.insert("page".into(), json!("9"));
        let pagination = Pagination { page: 9, limit: 10, offset: 80 };
        let page = ListPage {
            rows: vec![json!({"id": 21})],
            window: pagination.window(21),
            filters,
            aggregates: Some(json!({"count(*)": 21})),
        };
        let (_, Json(body)) = list_response(page);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["message"], "Data successfully fetched");
        assert_eq!(v["metadata"]["pagination"], json!({"totalItems": 21, "totalPages": 3, "currentPage": 3, "limit": 10}));
        assert_eq!(v["metadata"]["filters"]["page"], "9");
        assert_eq!(v["metadata"]["aggregates"]["count(*)"], 21);
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(body_object(Some(Json(json!([1, 2])))).is_err());
        assert!(body_object(None).unwrap().is_empty());
    }
}
