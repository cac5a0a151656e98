use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use tracing::error;

use keepsake_core::CapsuleError;
use keepsake_types::api::ErrorResponse;

/// HTTP mapping for domain errors. `NotReady` uses 423 Locked and carries
/// the remaining seconds so clients can render a countdown.
pub struct ApiError(pub CapsuleError);

impl From<CapsuleError> for ApiError {
    fn from(err: CapsuleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after_secs) = match &self.0 {
            CapsuleError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string(), None),
            CapsuleError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string(), None),
            CapsuleError::Permission => (StatusCode::FORBIDDEN, self.0.to_string(), None),
            CapsuleError::NotReady { remaining } => (
                StatusCode::LOCKED,
                self.0.to_string(),
                Some(remaining.num_seconds().max(0) as u64),
            ),
            CapsuleError::Transient(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string(), None)
            }
            CapsuleError::Conflict => (StatusCode::CONFLICT, self.0.to_string(), None),
            CapsuleError::Storage(e) => {
                error!("Storage error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                retry_after_secs,
            }),
        )
            .into_response()
    }
}
