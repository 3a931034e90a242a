//! Error types for the query service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("provisioning sandbox: {0}")]
    Provision(String),

    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("sandbox pool is shut down")]
    PoolClosed,
}

impl QueryError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            QueryError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (
            self.http_status_code(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            QueryError::Provision("boom".into()).http_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            QueryError::Database(sqlx::Error::RowNotFound).http_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            QueryError::PoolClosed.http_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
