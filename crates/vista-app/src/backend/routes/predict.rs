use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::task;
use tracing::{info, warn};
use vista_core::ErrorKind;
use vista_core::extension::is_allowed;

use crate::backend::state::AppState;
use crate::error::AppError;
use crate::prediction::ImageSource;
use crate::uploads::UploadedFile;

/// The `file` field of a prediction form.
async fn read_file_field(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?.to_vec();
        if filename.is_empty() || !is_allowed(&filename) {
            return Err(AppError::InvalidFile);
        }
        return Ok(UploadedFile { filename, bytes });
    }
    Err(AppError::NoFile)
}

async fn run_prediction(
    state: Arc<AppState>,
    file: UploadedFile,
    keep_upload: bool,
) -> Result<Response, AppError> {
    let service = state.services.get().ok_or(AppError::ModelNotLoaded)?;

    let record = task::spawn_blocking(move || {
        let kept = keep_upload.then(|| file.clone());
        let record = service.predict(&ImageSource::Upload {
            filename: file.filename,
            bytes: file.bytes,
        });
        // Only images that classified are kept
        if let Some(file) = kept.filter(|_| record.is_success()) {
            if let Err(e) = state.uploads.store_prediction_upload(&file) {
                warn!(file = %file.filename, "Upload not stored: {e}");
            }
        }
        if let Err(e) = state.log.append(&record) {
            warn!("Prediction not logged: {e}");
        }
        record
    })
    .await?;

    let status = match record.failure() {
        None => StatusCode::OK,
        Some(f) if matches!(f.kind, ErrorKind::InvalidImage | ErrorKind::InvalidFileType) => {
            StatusCode::BAD_REQUEST
        }
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if let Some(c) = record.value() {
        info!(class = %c.predicted_class, confidence = c.confidence, "Prediction served");
    }
    Ok((status, Json(record)).into_response())
}

/// Form upload: predicts and keeps the image under the upload directory.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let file = read_file_field(multipart).await?;
    run_prediction(state, file, true).await
}

pub async fn api_predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let file = read_file_field(multipart).await?;
    run_prediction(state, file, false).await
}
