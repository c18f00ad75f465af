// HTTP error responses.
//
// Handlers return `Result<_, ApiError>`; every error renders as
// `{"success": false, "error": "..."}` with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use hexa_llm::LlmError;
use hexa_notebook::NotebookError;

use crate::container::Attempt;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("OpenAI API key not configured")]
    NotConfigured,

    /// Every container endpoint refused the notebook.
    #[error("Failed to save notebook to container")]
    ContainerSave { attempts: Vec<Attempt> },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Map a relay failure to the response the caller sees. The underlying
    /// error is logged; the client only gets `message`.
    pub fn relay(err: LlmError, message: &str) -> Self {
        match err {
            LlmError::NotConfigured => ApiError::NotConfigured,
            other => {
                error!(error = %other, "{message}");
                ApiError::Internal(message.to_string())
            }
        }
    }

    pub fn notebook(err: NotebookError, message: &str) -> Self {
        match err {
            NotebookError::Llm(llm) => ApiError::relay(llm, message),
            other => {
                error!(error = %other, "{message}");
                ApiError::Internal(message.to_string())
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotConfigured | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ContainerSave { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "internal error");
        ApiError::Internal("Internal server error".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::ContainerSave { attempts } => json!({
                "success": false,
                "error": self.to_string(),
                "attempts": attempts,
            }),
            _ => json!({ "success": false, "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn bad_request_shape() {
        let (status, body) = render(ApiError::bad_request("Prompt is required")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "Prompt is required" }));
    }

    #[tokio::test]
    async fn relay_maps_missing_key() {
        let (status, body) =
            render(ApiError::relay(LlmError::NotConfigured, "Failed to generate code")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "OpenAI API key not configured");
    }

    #[tokio::test]
    async fn relay_hides_upstream_detail() {
        let err = LlmError::Status {
            status: 429,
            body: "rate limited".into(),
        };
        let (status, body) = render(ApiError::relay(err, "Failed to generate diagram")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to generate diagram");
    }

    #[tokio::test]
    async fn container_failure_lists_attempts() {
        let attempts = vec![Attempt {
            via: "http".into(),
            url: Some("http://c/api/save".into()),
            status: Some(503),
            status_text: Some("Service Unavailable".into()),
            body: Some("down".into()),
        }];
        let (status, body) = render(ApiError::ContainerSave { attempts }).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Failed to save notebook to container");
        assert_eq!(body["attempts"][0]["status"], 503);
        assert_eq!(body["attempts"][0]["statusText"], "Service Unavailable");
    }
}
