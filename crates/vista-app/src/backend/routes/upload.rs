use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use tokio::task;

use crate::backend::schemas::UploadResponse;
use crate::backend::state::AppState;
use crate::error::AppError;
use crate::uploads::{DEFAULT_CLASS_LABEL, UploadedFile};

pub async fn upload_data(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();
    let mut class_label = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("files") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                if !filename.is_empty() {
                    files.push(UploadedFile { filename, bytes });
                }
            }
            Some("class_label") => class_label = Some(field.text().await?),
            _ => {}
        }
    }
    if files.is_empty() {
        return Err(AppError::NoFile);
    }
    let class_label = class_label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CLASS_LABEL.to_string());

    let summary =
        task::spawn_blocking(move || state.uploads.store_training_images(&class_label, &files))
            .await??;

    let message = match (summary.uploaded, summary.rejected.len()) {
        (0, rejected) => format!(
            "No valid images uploaded to class: {} ({rejected} rejected)",
            summary.class_label
        ),
        (uploaded, 0) => format!(
            "Successfully uploaded {uploaded} images to class: {}",
            summary.class_label
        ),
        (uploaded, rejected) => format!(
            "Successfully uploaded {uploaded} images to class: {} ({rejected} rejected)",
            summary.class_label
        ),
    };

    Ok(Json(UploadResponse {
        success: summary.uploaded > 0,
        message,
        class_label: summary.class_label,
        uploaded: summary.uploaded,
        rejected: summary.rejected,
    }))
}
