use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// Client-facing messages are drawn from this constant set only; backend
// detail never leaves the process except through logs.
pub const ERR_MSG_NOT_FOUND: &str = "The requested resource does not exist";
pub const ERR_MSG_CONSTRAINT: &str =
    "A resource with these attributes already exists or violates a constraint";
pub const ERR_MSG_DATABASE: &str = "A database error occurred. Please try again later.";
pub const ERR_MSG_SERVICE_UNAVAILABLE: &str =
    "The requested service is temporarily unavailable. Please try again later.";
pub const ERR_MSG_INVALID_ID: &str = "Invalid ID format: must be a valid UUID";
pub const ERR_MSG_RATE_LIMITED: &str = "Rate limit exceeded. Please try again later.";
pub const ERR_MSG_UNAUTHORIZED: &str = "Invalid or missing API key";
pub const ERR_MSG_INTERNAL: &str = "An internal server error occurred";

/// Application-level error taxonomy.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Conflict")]
    Conflict,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Maps a database error to the client taxonomy: missing rows become 404,
    /// constraint violations 409, everything else an opaque 500.
    pub fn from_db(err: sqlx::Error, operation: &str, resource_id: &str) -> AppError {
        if matches!(err, sqlx::Error::RowNotFound) {
            return AppError::NotFound;
        }

        tracing::error!(operation, resource_id, error = %err, "database operation failed");

        if let sqlx::Error::Database(db) = &err {
            use sqlx::error::ErrorKind;
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) {
                return AppError::Conflict;
            }
        }

        AppError::Database(err)
    }

    /// Maps a provider (enrichment/embedding) failure on a synchronous path.
    /// Full detail is logged; the client sees only a generic 503.
    pub fn from_provider(err: impl std::fmt::Display, service: &str, operation: &str) -> AppError {
        tracing::error!(service, operation, error = %err, "provider call failed");
        AppError::Provider(ERR_MSG_SERVICE_UNAVAILABLE.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                ERR_MSG_UNAUTHORIZED.to_string(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                ERR_MSG_NOT_FOUND.to_string(),
            ),
            AppError::Conflict => (
                StatusCode::CONFLICT,
                "CONFLICT",
                ERR_MSG_CONSTRAINT.to_string(),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                ERR_MSG_RATE_LIMITED.to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    ERR_MSG_DATABASE.to_string(),
                )
            }
            AppError::Provider(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                ERR_MSG_SERVICE_UNAVAILABLE.to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    ERR_MSG_INTERNAL.to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err = AppError::from_db(sqlx::Error::RowNotFound, "get", "abc");
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn test_generic_db_error_is_opaque() {
        let err = AppError::from_db(sqlx::Error::PoolClosed, "list", "experiences");
        assert!(matches!(err, AppError::Database(_)));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("x".into()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Provider("x".into()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
