use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failure of a plate scan attempt.
///
/// Everything except `Inference` is recoverable: the scanner is ready for a
/// new attempt as soon as the error is returned.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("tensor preparation failed: {0}")]
    TensorPrepFailure(String),

    #[error("no plate detected")]
    NoDetectionFound,

    #[error("scan timed out after {0:?}")]
    ScanTimeout(Duration),

    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
}

impl ScanError {
    pub fn camera(msg: impl Into<String>) -> Self {
        Self::CameraUnavailable(msg.into())
    }

    pub fn tensor_prep(msg: impl Into<String>) -> Self {
        Self::TensorPrepFailure(msg.into())
    }

    /// Short label for metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            ScanError::CameraUnavailable(_) => "camera_unavailable",
            ScanError::TensorPrepFailure(_) => "tensor_prep_failure",
            ScanError::NoDetectionFound => "no_detection",
            ScanError::ScanTimeout(_) => "timeout",
            ScanError::ScanInProgress => "in_progress",
            ScanError::Inference(_) => "inference_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScanError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScanError::TensorPrepFailure(_) => StatusCode::BAD_REQUEST,
            ScanError::NoDetectionFound => StatusCode::UNPROCESSABLE_ENTITY,
            ScanError::ScanTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ScanError::ScanInProgress => StatusCode::CONFLICT,
            ScanError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.outcome(),
        }));

        (status, body).into_response()
    }
}
