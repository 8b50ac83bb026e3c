use crate::services::ForumError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub fn status_for(error: &ForumError) -> StatusCode {
    match error {
        ForumError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ForumError::SessionTimeout | ForumError::InvalidSession => StatusCode::UNAUTHORIZED,
        ForumError::Validation(_) => StatusCode::BAD_REQUEST,
        ForumError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `ForumError` as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ForumError);

impl From<ForumError> for ApiError {
    fn from(error: ForumError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "moderation request failed");
        }
        (
            status,
            Json(json!({ "status": "error", "message": self.0.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_failures_are_unauthorized() {
        assert_eq!(status_for(&ForumError::InvalidSession), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&ForumError::SessionTimeout), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn response_carries_status() {
        let response = ApiError(ForumError::Validation("no_board".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
