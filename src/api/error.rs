// ABOUTME: Maps core errors onto HTTP responses for the management routes.
// ABOUTME: ChatError variants pick the status; anything else is a 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use newhorse_core::ChatError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::Invalid(_)) | Some(ChatError::Configuration(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(ChatError::Busy) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            tracing::debug!(error = %self.0, status = %status, "Request rejected");
            self.0.to_string()
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
