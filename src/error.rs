//! # Error Handling
//!
//! HTTP errors rendered as `application/problem+json` with trace id
//! propagation, plus store error classification shared by the repositories
//! and the sync engine.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr, SqlErr};
use serde::Serialize;
use utoipa::ToSchema;

use crate::telemetry;

/// Problem response body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Machine-readable error code
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation id for log lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(String::into_boxed_str)
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        (self.status, headers, axum::Json(self)).into_response()
    }
}

pub fn bad_request(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}

pub fn not_found(what: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("{what} not found"))
}

pub fn conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(db_err) = error.downcast_ref::<DbErr>() {
            if is_unique_violation(db_err) {
                return conflict("Resource already exists");
            }
            if is_foreign_key_violation(db_err) {
                return conflict("Referenced resource does not exist");
            }
        }
        tracing::error!(error = ?error, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {err}"),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {err}"),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };
        bad_request(&message)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        bad_request(&format!("Invalid path parameter: {rejection}"))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(&format!("Invalid query parameter: {rejection}"))
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            return conflict("Resource already exists");
        }
        if is_foreign_key_violation(&error) {
            return conflict("Referenced resource does not exist");
        }
        match error {
            DbErr::RecordNotFound(record) => not_found(&record),
            DbErr::Conn(err) => {
                tracing::error!(error = ?err, "database connection error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!(error = ?other, "database error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

const PG_UNIQUE: &str = "23505";
const PG_FOREIGN_KEY: &str = "23503";
const SQLITE_UNIQUE: &[&str] = &["1555", "2067"];
const SQLITE_FOREIGN_KEY: &str = "787";

fn database_error_code(error: &DbErr) -> Option<String> {
    let sqlx_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(e)) | DbErr::Exec(RuntimeErr::SqlxError(e)) => e,
        _ => return None,
    };
    sqlx_err
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned())
}

/// True for unique/primary-key violations on Postgres or SQLite.
pub fn is_unique_violation(error: &DbErr) -> bool {
    if matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    database_error_code(error)
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_UNIQUE.contains(&code.as_str()))
}

/// True for foreign-key violations on Postgres or SQLite.
pub fn is_foreign_key_violation(error: &DbErr) -> bool {
    if matches!(
        error.sql_err(),
        Some(SqlErr::ForeignKeyConstraintViolation(_))
    ) {
        return true;
    }
    database_error_code(error).is_some_and(|code| code == PG_FOREIGN_KEY || code == SQLITE_FOREIGN_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn problem_body_skips_status_and_empty_details() {
        let error = bad_request("period_type must be weekly or monthly");
        let body = serde_json::to_value(&error).expect("serializes");
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert!(body.get("status").is_none());
        assert!(body.get("details").is_none());
        assert!(body["trace_id"].as_str().is_some());
    }

    #[test]
    fn details_are_attached() {
        let error = bad_request("bad").with_details(json!({ "field": "date_from" }));
        assert_eq!(error.details, Some(Box::new(json!({ "field": "date_from" }))));
    }

    #[test]
    fn anyhow_errors_are_opaque() {
        let error: ApiError = anyhow::anyhow!("secret connection string").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("secret"));
    }

    #[test]
    fn record_not_found_maps_to_404() {
        let error: ApiError = DbErr::RecordNotFound("integration".to_string()).into();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn non_sql_errors_are_not_constraint_violations() {
        let error = DbErr::Custom("boom".to_string());
        assert!(!is_unique_violation(&error));
        assert!(!is_foreign_key_violation(&error));
    }

    #[tokio::test]
    async fn problem_response_has_problem_content_type() {
        let response = not_found("integration").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
    }
}
