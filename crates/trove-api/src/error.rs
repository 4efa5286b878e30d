use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use trove_db::StoreError;

/// Every handler returns this. The body is always `{"error": "..."}` so
/// clients have one shape to parse regardless of which layer refused.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if let ApiError::Internal(e) = &self {
            // Log the cause, never leak it to the client.
            error!("internal error: {:#}", e);
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound(e.to_string()),
            StoreError::NotPermitted | StoreError::NotClaimant => {
                ApiError::Forbidden(e.to_string())
            }
            StoreError::OwnItem
            | StoreError::NotClaimable
            | StoreError::NotClaimed
            | StoreError::NotPending
            | StoreError::NotRecovered
            | StoreError::AlreadyRated
            | StoreError::PhoneUnverified => ApiError::Conflict(e.to_string()),
            StoreError::RatingOutOfRange => ApiError::Validation(e.to_string()),
            // UNIQUE / CHECK violations are client races, not server faults.
            StoreError::Db(rusqlite::Error::SqliteFailure(f, _))
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict("resource already exists".into())
            }
            StoreError::Poisoned | StoreError::Db(_) => {
                ApiError::Internal(anyhow::Error::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_precise_statuses() {
        assert_eq!(
            ApiError::from(StoreError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::NotPermitted).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(StoreError::NotClaimable).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::RatingOutOfRange).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
