//! HTTP mapping of component errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::CivicError;

impl CivicError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CivicError::Conflict(_) => StatusCode::CONFLICT,
            CivicError::Validation(_) => StatusCode::BAD_REQUEST,
            CivicError::NotFound(_) => StatusCode::NOT_FOUND,
            CivicError::Forbidden(_) | CivicError::CapabilityDenied(_) => StatusCode::FORBIDDEN,
            CivicError::Notifier(_) => StatusCode::BAD_GATEWAY,
            CivicError::Storage(_) | CivicError::Migration(_) | CivicError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CivicError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Store details stay in the log.
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CivicError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(CivicError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CivicError::CapabilityDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CivicError::Storage(sqlx::Error::PoolTimedOut).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
