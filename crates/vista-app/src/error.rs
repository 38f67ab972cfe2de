use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use vista_core::PreprocessError;

use crate::prediction::LogError;
use crate::retrain::RetrainError;
use crate::uploads::UploadError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No file provided")]
    NoFile,

    #[error("Invalid file")]
    InvalidFile,

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Retrain(#[from] RetrainError),

    #[error("Prediction log unavailable: {0}")]
    Log(#[from] LogError),

    #[error("Dataset unavailable: {0}")]
    Dataset(#[from] PreprocessError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoFile | Self::InvalidFile => StatusCode::BAD_REQUEST,
            Self::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Multipart(e) => e.status(),
            Self::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(_) => StatusCode::BAD_REQUEST,
            Self::Retrain(RetrainError::AlreadyRunning) => StatusCode::CONFLICT,
            Self::Retrain(_) | Self::Log(_) | Self::Dataset(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
