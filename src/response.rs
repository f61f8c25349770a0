//! Standard response envelope shared by every handler.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub message: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub pagination: PaginationMeta,
    pub filters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub limit: u64,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        ApiResponse {
            success: Some(true),
            message: message.into(),
            status: "ok",
            data,
            error_message: None,
            status_code: None,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>, status: StatusCode) -> Self {
        ApiResponse {
            success: Some(false),
            message: message.into(),
            status: "error",
            data: None,
            error_message: None,
            status_code: Some(status.as_u16()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub fn success_ok(message: &str, data: Option<Value>) -> (StatusCode, Json<ApiResponse>) {
    (StatusCode::OK, Json(ApiResponse::ok(message, data)))
}

pub fn success_created(message: &str, data: Option<Value>) -> (StatusCode, Json<ApiResponse>) {
    let mut body = ApiResponse::ok(message, data);
    body.status_code = Some(StatusCode::CREATED.as_u16());
    (StatusCode::CREATED, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_skips_absent_fields() {
        let v = serde_json::to_value(ApiResponse::ok("Data successfully fetched", Some(json!({"id": 1})))).unwrap();
        assert_eq!(
            v,
            json!({"success": true, "message": "Data successfully fetched", "status": "ok", "data": {"id": 1}})
        );
    }

    #[test]
    fn metadata_uses_camel_case() {
        let body = ApiResponse::ok("No data found", Some(json!([]))).with_metadata(Metadata {
            pagination: PaginationMeta {
                total_items: 0,
                total_pages: 0,
                current_page: 1,
                limit: 10,
            },
            filters: json!({}),
            aggregates: None,
        });
        let v = serde_json::to_value(body).unwrap();
        assert_eq!(v["metadata"]["pagination"]["totalItems"], 0);
        assert_eq!(v["metadata"]["pagination"]["currentPage"], 1);
        assert!(v["metadata"].get("aggregates").is_none());
    }
}
