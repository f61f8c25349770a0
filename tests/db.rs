//! Database-backed tests. They run only when `TEST_DATABASE_URL` points at a PostgreSQL
//! database; each test works in its own throwaway schema.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use crudgate::config::{AssociationRule, AssociationRules};
use crudgate::{
    ensure_rbac_tables, entity_routes, load_entities, rbac_routes, AppState, PermissionResolver, PgPermissionStore,
    Settings,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    pool: PgPool,
    schema: String,
    app: Router,
}

impl Harness {
    async fn start() -> Option<Harness> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .ok()?;
        let schema = format!("crudgate_t_{}", uuid::Uuid::new_v4().simple());
        let settings = Settings {
            db_schema: schema.clone(),
            associations: AssociationRules {
                default_updatable_fields: vec![],
                rules: vec![AssociationRule {
                    source: Some("tasks".into()),
                    target: "goals".into(),
                    updatable_fields: vec!["progress".into()],
                }],
            },
            ..Settings::default()
        };
        ensure_rbac_tables(&pool, &settings).await.unwrap();
        for ddl in [
            format!(
                r#"CREATE TABLE "{schema}".goals (
                    id SERIAL PRIMARY KEY,
                    custom_id VARCHAR(64) NOT NULL UNIQUE,
                    name TEXT,
                    progress INT NOT NULL DEFAULT 0
                )"#
            ),
            format!(
                r#"CREATE TABLE "{schema}".tasks (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(100) NOT NULL,
                    description TEXT,
                    progress INT,
                    user_custom_id VARCHAR(64) NOT NULL REFERENCES "{schema}".users (custom_id),
                    goal_id INT REFERENCES "{schema}".goals (id),
                    "createdAt" TIMESTAMPTZ NOT NULL,
                    "updatedAt" TIMESTAMPTZ NOT NULL
                )"#
            ),
            format!(r#"INSERT INTO "{schema}".users (custom_id) VALUES ('u-1'), ('u-2')"#),
            format!(r#"INSERT INTO "{schema}".goals (custom_id, name) VALUES ('g-1', 'fitness')"#),
        ] {
            sqlx::query(&ddl).execute(&pool).await.unwrap();
        }
        let registry = load_entities(&pool, &schema).await.unwrap();
        let permissions = PermissionResolver::new(Arc::new(PgPermissionStore::new(pool.clone(), &settings)));
        let state = AppState {
            pool: pool.clone(),
            registry: Arc::new(registry),
            settings: Arc::new(settings),
            permissions,
        };
        let app = Router::new()
            .nest("/api/v1", entity_routes(state.clone()))
            .nest("/api/v2", rbac_routes(state));
        Some(Harness { pool, schema, app })
    }

    async fn call(&self, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(u) = user {
            req = req.header("X-User-Id", u);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn scalar(&self, sql: &str) -> i64 {
        let sql = sql.replace("{schema}", &format!("\"{}\"", self.schema));
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await.unwrap()
    }

    async fn exec(&self, sql: &str) {
        let sql = sql.replace("{schema}", &format!("\"{}\"", self.schema));
        sqlx::query(&sql).execute(&self.pool).await.unwrap();
    }

    async fn stop(self) {
        let _ = sqlx::query(&format!("DROP SCHEMA \"{}\" CASCADE", self.schema))
            .execute(&self.pool)
            .await;
    }
}

#[tokio::test]
async fn create_links_owner_and_associated_record() {
    let Some(h) = Harness::start().await else { return };
    let (status, body) = h
        .call(
            "POST",
            "/api/v1/tasks",
            Some("u-1"),
            Some(json!({"name": "run", "progress": 40, "assoc_custom_id": "g-1"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["user_custom_id"], "u-1");
    assert_eq!(body["data"]["goal_id"], 1);
    assert!(body["data"]["createdAt"].is_string());
    // progress is an updatable field of the goals association
    assert_eq!(h.scalar("SELECT progress::bigint FROM {schema}.goals WHERE custom_id = 'g-1'").await, 40);
    h.stop().await;
}

#[tokio::test]
async fn failed_create_leaves_no_partial_write() {
    let Some(h) = Harness::start().await else { return };
    let (status, _) = h
        .call(
            "POST",
            "/api/v1/tasks",
            Some("u-1"),
            Some(json!({"name": "run", "progress": 90, "assoc_custom_id": "g-404"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The goal update succeeds, then the insert fails validation: both must roll back.
    let (status, body) = h
        .call("POST", "/api/v1/tasks", Some("u-1"), Some(json!({"progress": 75, "assoc_custom_id": "g-1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing required fields: name");
    assert_eq!(h.scalar("SELECT COUNT(*) FROM {schema}.tasks").await, 0);
    assert_eq!(h.scalar("SELECT progress::bigint FROM {schema}.goals WHERE custom_id = 'g-1'").await, 0);

    let (status, body) = h.call("POST", "/api/v1/tasks", Some("u-404"), Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");
    h.stop().await;
}

#[tokio::test]
async fn writes_are_scoped_to_the_owner() {
    let Some(h) = Harness::start().await else { return };
    let (_, created) = h.call("POST", "/api/v1/tasks", Some("u-1"), Some(json!({"name": "run"}))).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = h
        .call("PUT", &format!("/api/v1/tasks/{id}"), Some("u-2"), Some(json!({"name": "stolen"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Data not updated");

    let (status, body) = h.call("DELETE", &format!("/api/v1/tasks/{id}"), Some("u-2"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Data not deleted");

    let (status, body) = h
        .call(
            "PUT",
            &format!("/api/v1/tasks/{id}"),
            Some("u-1"),
            Some(json!({"name": "walk", "user_custom_id": "u-2", "id": 999})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "walk");
    assert_eq!(body["data"]["user_custom_id"], "u-1");
    assert_eq!(body["data"]["id"], id);

    let (status, _) = h.call("DELETE", &format!("/api/v1/tasks/{id}"), Some("u-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.call("GET", &format!("/api/v1/tasks/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    h.stop().await;
}

#[tokio::test]
async fn list_filters_pages_and_includes() {
    let Some(h) = Harness::start().await else { return };
    for (name, progress, user) in [("a", 10, "u-1"), ("b", 20, "u-1"), ("c", 30, "u-2"), ("d", 40, "u-1")] {
        let (status, _) = h
            .call(
                "POST",
                "/api/v1/tasks",
                Some(user),
                Some(json!({"name": name, "progress": progress, "assoc_custom_id": "g-1"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = h
        .call("GET", "/api/v1/tasks?progress%5Bgte%5D=20&progress%5Blte%5D=30&sort=-progress&include=goals", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "c");
    assert_eq!(rows[0]["goals"]["custom_id"], "g-1");
    assert_eq!(body["metadata"]["filters"]["progress[gte]"], "20");

    let (_, body) = h.call("GET", "/api/v1/tasks?limit=3&page=99", None, None).await;
    assert_eq!(body["metadata"]["pagination"], json!({"totalItems": 4, "totalPages": 2, "currentPage": 2, "limit": 3}));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = h.call("GET", "/api/v1/tasks?fields=id,name&aggregate=sum(progress)", None, None).await;
    assert!(body["data"][0].get("progress").is_none());
    assert_eq!(body["metadata"]["aggregates"]["sum(progress)"], 100);

    let (_, body) = h.call("GET", "/api/v1/tasks/mine", Some("u-2"), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "c");

    let (status, body) = h.call("GET", "/api/v1/tasks?name=zzz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No data found");
    h.stop().await;
}

#[tokio::test]
async fn rbac_graph_gates_management_routes() {
    let Some(h) = Harness::start().await else { return };
    h.exec("INSERT INTO {schema}.roles (role_name, is_system_role) VALUES ('admin', TRUE), ('viewer', FALSE)")
        .await;
    h.exec("INSERT INTO {schema}.permissions (permission_name) VALUES ('manage_roles')").await;
    h.exec(
        "INSERT INTO {schema}.resources (resource_name, resource_type, resource_path, http_method) VALUES \
         ('roles_any', 'API_ENDPOINT', '/api/v2/roles', 'ALL'), \
         ('role_by_id', 'API_ENDPOINT', '/api/v2/roles/:id', 'ALL')",
    )
    .await;
    h.exec("INSERT INTO {schema}.role_permissions (role_id, permission_id) VALUES (1, 1)").await;
    h.exec("INSERT INTO {schema}.permission_resources (permission_id, resource_name) VALUES (1, 'roles_any'), (1, 'role_by_id')")
        .await;
    h.exec("INSERT INTO {schema}.user_roles (user_id, role_id) VALUES ('u-1', 1), ('u-2', 2)").await;

    let (status, _) = h.call("GET", "/api/v2/roles", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = h.call("GET", "/api/v2/roles", Some("u-2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "No permissions assigned to your roles");

    let (status, body) = h.call("GET", "/api/v2/roles", Some("u-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = h.call("DELETE", "/api/v2/roles/1", Some("u-1"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "System roles cannot be deleted");

    let (status, _) = h.call("POST", "/api/v2/roles", Some("u-1"), Some(json!({"roleName": "viewer"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.exec("UPDATE {schema}.resources SET is_public = TRUE WHERE resource_name = 'roles_any'").await;
    let (status, _) = h.call("GET", "/api/v2/roles", None, None).await;
    assert_eq!(status, StatusCode::OK);
    h.stop().await;
}

#[tokio::test]
async fn external_id_wins_over_another_users_internal_id() {
    let Some(h) = Harness::start().await else { return };
    // u-1 has internal id 1; this user's external id is "1".
    h.exec("INSERT INTO {schema}.users (custom_id) VALUES ('1')").await;

    let (status, body) = h.call("POST", "/api/v1/tasks", Some("1"), Some(json!({"name": "mine"}))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["user_custom_id"], "1");

    // No external id "2", so the internal id still resolves.
    let (_, body) = h.call("POST", "/api/v1/tasks", Some("2"), Some(json!({"name": "theirs"}))).await;
    assert_eq!(body["data"]["user_custom_id"], "u-2");

    let (_, body) = h.call("GET", "/api/v1/tasks/mine", Some("u-1"), None).await;
    assert_eq!(body["message"], "No data found");
    h.stop().await;
}

#[tokio::test]
async fn created_record_reads_back_unchanged() {
    let Some(h) = Harness::start().await else { return };
    let payload = json!({"name": "swim", "description": "50 laps", "progress": 12, "assoc_custom_id": "g-1"});
    let (status, created) = h.call("POST", "/api/v1/tasks", Some("u-2"), Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let created = &created["data"];
    let id = created["id"].as_i64().unwrap();

    let (status, fetched) = h.call("GET", &format!("/api/v1/tasks/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&fetched["data"], created);
    for field in ["name", "description", "progress"] {
        assert_eq!(fetched["data"][field], payload[field], "{field}");
    }
    assert_eq!(fetched["data"]["user_custom_id"], "u-2");
    assert_eq!(fetched["data"]["goal_id"], 1);
    h.stop().await;
}

#[tokio::test]
async fn malformed_input_is_a_client_outcome() {
    let Some(h) = Harness::start().await else { return };
    let (_, created) = h.call("POST", "/api/v1/tasks", Some("u-1"), Some(json!({"name": "run", "progress": 5}))).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = h.call("GET", "/api/v1/tasks/abc", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Data not found");
    let (status, _) = h.call("GET", "/api/v1/tasks/99999999999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for uri in [
        "/api/v1/tasks?progress=abc",
        "/api/v1/tasks?progress=99999999999",
        "/api/v1/tasks?progress%5Bin%5D=x,y",
        "/api/v1/tasks?name=zzz&page=9223372036854775807&limit=1000",
    ] {
        let (status, body) = h.call("GET", uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["message"], "No data found", "{uri}");
    }

    let (status, body) = h.call("GET", "/api/v1/tasks?page=9223372036854775807&limit=1000", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["pagination"]["currentPage"], 1);

    let (status, body) = h.call("GET", "/api/v1/tasks?aggregate=sum(name)", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["metadata"]["aggregates"].is_null());

    let (status, body) = h.call("GET", "/api/v1/tasks?createdAt=yesterday-ish", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid input value");

    let (status, body) = h.call("PUT", "/api/v1/tasks/abc", Some("u-1"), Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Data not updated");
    let (status, body) = h.call("DELETE", "/api/v1/tasks/abc", Some("u-1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Data not deleted");

    let (status, body) = h
        .call("PUT", &format!("/api/v1/tasks/{id}"), Some("u-1"), Some(json!({"progress": 99999999999i64})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "progress has an invalid value");
    h.stop().await;
}
