use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::backend::schemas::RetrainStartResponse;
use crate::backend::state::AppState;
use crate::error::AppError;
use crate::retrain::RetrainingStatus;

/// Kicks off a background run; the caller polls `/api/retrain_status`.
pub async fn start_retraining(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<RetrainStartResponse>), AppError> {
    // Detached: the run reports through the status
    let _handle = state.retrainer.start()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RetrainStartResponse {
            message: "Retraining started! This may take several minutes.".to_string(),
            status: state.retrainer.status(),
        }),
    ))
}

pub async fn retrain_status(State(state): State<Arc<AppState>>) -> Json<RetrainingStatus> {
    Json(state.retrainer.status())
}
