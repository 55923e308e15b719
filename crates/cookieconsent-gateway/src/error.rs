//! Mapping of data-layer errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cookieconsent_core::Error;
use tokio::task::JoinError;
use tracing::error;

/// Error body: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        Self(Error::Internal(format!("task failed: {}", err)))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            Error::Validation { .. } => "validation",
            Error::NotFound(_) => "not_found",
            Error::StorageUnavailable(_) => "storage_unavailable",
            _ => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage and internal details stay in the log, not the response.
        let message = match &self.0 {
            Error::Validation { .. } | Error::NotFound(_) => self.0.to_string(),
            Error::StorageUnavailable(_) => {
                error!(error = %self.0, "storage unavailable");
                "storage temporarily unavailable, please retry".to_string()
            }
            _ => {
                error!(error = %self.0, "request failed");
                "internal error".to_string()
            }
        };
        let mut body = serde_json::json!({
            "error": { "code": self.code(), "message": message }
        });
        if let Error::Validation { field, .. } = &self.0 {
            body["error"]["field"] = serde_json::Value::String(field.clone());
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError(Error::validation("domain", "is required")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError(Error::NotFound("x".into())).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(Error::storage("locked")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
