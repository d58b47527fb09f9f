// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! HTTP 错误响应 `{"detail": ...}`

use crate::pipeline::ManagerError;
use crate::recording::LibraryError;
use crate::CameraId;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("camera {0} not found")]
    CameraNotFound(CameraId),
    #[error("recording not found")]
    RecordingNotFound,
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable { len: u64 },
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CameraNotFound(_) | ApiError::RecordingNotFound => StatusCode::NOT_FOUND,
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ManagerError> for ApiError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::UnknownCamera(id) => ApiError::CameraNotFound(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        match e {
            // 非法文件名同样按 404 处理, 不暴露校验细节
            LibraryError::InvalidName(_) | LibraryError::NotFound(_) => ApiError::RecordingNotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::RecordingNotFound
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("background task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ 请求失败: {}", self);
        }
        let mut response = (status, Json(json!({ "detail": self.to_string() }))).into_response();
        if let ApiError::RangeNotSatisfiable { len } = self {
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{}", len)) {
                response.headers_mut().insert(header::CONTENT_RANGE, v);
            }
        }
        response
    }
}
