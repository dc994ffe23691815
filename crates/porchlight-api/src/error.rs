//! Error taxonomy for the API layer.
//!
//! Handlers return [`ApiError`]; the `IntoResponse` impl maps each class to
//! its status code and a small JSON body. Internal causes are logged and
//! never shown to callers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use porchlight_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Referenced user or request does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Entities exist but the operation is not allowed: wrong role, wrong
    /// actor, terminal state, malformed proximity input.
    #[error("{0}")]
    BusinessRule(String),

    /// A concurrent writer won a version race, or a unique constraint was
    /// hit.
    #[error("{0}")]
    Conflict(String),

    /// Malformed input shape, reported per field.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials.
    #[error("invalid credentials")]
    Unauthorized,

    /// Anything else; opaque to callers.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BusinessRule(msg) | Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "unexpected error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(msg) => Self::Conflict(msg.to_string()),
            StoreError::Sqlite(e) => Self::Internal(e.into()),
            StoreError::Other(e) => Self::Internal(e),
        }
    }
}

pub(crate) fn join_error(err: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("blocking task failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_map_to_their_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BusinessRule("x".into()), StatusCode::CONFLICT),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn store_conflicts_keep_their_class() {
        let err: ApiError = StoreError::Conflict("request was modified concurrently").into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = StoreError::NotFound("request").into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
