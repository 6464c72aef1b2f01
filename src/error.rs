//! 统一的 API 错误类型与状态码映射。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;
use tracing::{debug, warn};

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response(),
            ApiError::UnsupportedMediaType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        let message = error.to_string();
        match error {
            StorageError::InvalidName | StorageError::InvalidPath(_) => {
                ApiError::BadRequest(message)
            }
            StorageError::StreamRead(err) => {
                debug!(error = %err, "upload body aborted");
                ApiError::BadRequest(message)
            }
            StorageError::UnsupportedType(_) => ApiError::UnsupportedMediaType(message),
            StorageError::SizeLimitExceeded(_) => ApiError::PayloadTooLarge(message),
            StorageError::NotFound(_) => ApiError::NotFound(message),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(message),
                _ => {
                    warn!(error = %err, "storage io failure");
                    ApiError::Internal(message)
                }
            },
        }
    }
}
