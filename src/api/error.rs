use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::{api::types::ErrorBody, db::StorageError, inference::InferenceError};

/// Every way a `/chat` request can fail; mapped to a status code only here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(&'static str),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            ChatError::Validation(msg) => (StatusCode::BAD_REQUEST, body(msg, None)),
            ChatError::Inference(InferenceError::Unavailable { last_error, .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                body("inference service unavailable", Some(last_error.clone())),
            ),
            ChatError::Inference(InferenceError::RequestFailed { status, body: upstream }) => {
                let code = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    code,
                    body(
                        &format!("inference request failed: {status}"),
                        Some(upstream.clone()),
                    ),
                )
            }
            ChatError::Inference(InferenceError::InvalidRequest(_)) | ChatError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("internal server error", None),
            ),
            ChatError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("storage write failed", None),
            ),
        }
    }
}

fn body(error: &str, details: Option<String>) -> ErrorBody {
    ErrorBody {
        error: error.to_string(),
        details,
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match &self {
            ChatError::Validation(msg) => warn!(reason = msg, "rejected chat request"),
            ChatError::Inference(InferenceError::RequestFailed { status, body }) => {
                warn!(status, body = %body, "inference request failed")
            }
            ChatError::Inference(err) => error!(error = %err, "inference failed"),
            ChatError::Storage(err) => error!(error = %err, "failed to persist chat record"),
            ChatError::Internal(err) => error!(error = ?err, "unhandled server error"),
        }

        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding_failure() -> StorageError {
        StorageError::Encoding(serde_json::from_str::<serde_json::Value>("{").unwrap_err())
    }

    #[test]
    fn maps_errors_to_status_codes() {
        let cases = [
            (ChatError::Validation("empty message"), StatusCode::BAD_REQUEST),
            (
                ChatError::Inference(InferenceError::Unavailable {
                    attempts: 3,
                    last_error: "timeout".into(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ChatError::Inference(InferenceError::RequestFailed {
                    status: 401,
                    body: "bad token".into(),
                }),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ChatError::Inference(InferenceError::RequestFailed {
                    status: 302,
                    body: String::new(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ChatError::Storage(encoding_failure()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ChatError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let (_, body) = ChatError::Internal(anyhow::anyhow!("secret path /etc/x")).status_and_body();
        assert_eq!(body.error, "internal server error");
        assert!(body.details.is_none());

        let (_, body) = ChatError::Storage(encoding_failure()).status_and_body();
        assert_eq!(body.error, "storage write failed");
        assert!(body.details.is_none());
    }
}
