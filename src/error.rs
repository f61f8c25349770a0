//! Typed errors and HTTP mapping.

use crate::response::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema load: {0}")]
    Load(String),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("association rules: {0}")]
    Rules(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    /// Ownership-scoped write matched no row.
    #[error("{0}")]
    NotAffected(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    /// A transactional write was rolled back.
    #[error("transaction rolled back: {0}")]
    Transaction(String),
    #[error("database: {0}")]
    Db(#[source] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Conflict(_) | AppError::NotAffected(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Schema(_) | AppError::Transaction(_) | AppError::Db(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the caller. Internal failures collapse to a generic text.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Db(sqlx::Error::RowNotFound) => "Data not found".to_string(),
            AppError::Schema(_) | AppError::Transaction(_) | AppError::Db(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Maps unique violations to a client error; everything else stays a database failure.
    pub fn from_write(e: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return AppError::Conflict(format!("{} already exists", what));
            }
            if db.is_foreign_key_violation() {
                return AppError::Validation(format!("{} references a missing record", what));
            }
            if db.is_check_violation() {
                return AppError::Validation(format!("{} violates a check constraint", what));
            }
        }
        AppError::from(e)
    }
}

/// SQLSTATEs raised by values the target type cannot hold: bad text representation,
/// numeric out of range, bad datetime format, datetime out of range.
const INVALID_INPUT_CODES: [&str; 4] = ["22P02", "22003", "22007", "22008"];

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().is_some_and(|c| INVALID_INPUT_CODES.contains(&c.as_ref())) {
                tracing::debug!(error = %db, "invalid input value");
                return AppError::Validation("Invalid input value".into());
            }
        }
        AppError::Db(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ApiResponse::error(self.public_message(), status);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_failures_hide_detail() {
        let err = AppError::Db(sqlx::Error::Protocol("relation \"secret\" does not exist".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");

        let err = AppError::Transaction("insert into tasks failed".into());
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn client_errors_keep_message() {
        let err = AppError::NotFound("User not found".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "User not found");

        assert_eq!(AppError::NotAffected("Data not updated".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Forbidden("no roles".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Unauthorized("Unauthorized".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Conflict("role already exists".into()).status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn error_body_is_envelope() {
        let resp = AppError::Db(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["success"], false);
        assert_eq!(v["statusCode"], 500);
        assert_eq!(v["message"], "Internal server error");
        assert!(!v.to_string().contains("pool"));
    }
}
