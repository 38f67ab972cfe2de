use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use tokio::task;
use vista_core::dataset_statistics;

use crate::backend::schemas::{HealthResponse, StatisticsResponse};
use crate::backend::state::AppState;
use crate::error::AppError;
use crate::metrics::SystemMetrics;

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Json<SystemMetrics>, AppError> {
    let metrics = task::spawn_blocking(move || {
        let uptime = state.services.uptime_string();
        state.metrics.collect(uptime)
    })
    .await?;
    Ok(Json(metrics))
}

/// Training set composition and prediction log aggregates.
pub async fn statistics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatisticsResponse>, AppError> {
    task::spawn_blocking(move || -> Result<_, AppError> {
        Ok(Json(StatisticsResponse {
            dataset: dataset_statistics(&state.config.train_dir)?,
            predictions: state.log.statistics()?,
        }))
    })
    .await?
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.services.is_loaded(),
        retraining: state.retrainer.status().is_running,
    })
}
