use axum::response::{IntoResponse, Response};
use axum::Json;
use branchpass_gate::AuthError;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error returned by the JSON endpoints.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AuthError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            AuthError::Unauthenticated(_)
            | AuthError::TokenReplayed
            | AuthError::TokenExpired { .. }
            | AuthError::TokenWrongType(_)
            | AuthError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self.0 {
            AuthError::UpstreamUnavailable(_) => {
                error!(error = %self.0, "directory unavailable");
                "directory temporarily unavailable".to_string()
            }
            AuthError::Internal(_) => {
                error!(error = %self.0, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.0.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
