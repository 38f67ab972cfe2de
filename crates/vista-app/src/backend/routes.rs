use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::backend::routes::monitor::{health, metrics, statistics};
use crate::backend::routes::predict::{api_predict, predict};
use crate::backend::routes::retrain::{retrain_status, start_retraining};
use crate::backend::routes::upload::upload_data;
use crate::backend::state::AppState;

mod monitor;
mod predict;
mod retrain;
mod upload;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict", post(predict))
        .route("/api/predict", post(api_predict))
        .route("/upload_data", post(upload_data))
        .route("/retrain", post(start_retraining))
        .route("/api/retrain_status", get(retrain_status))
        .route("/api/metrics", get(metrics))
        .route("/api/statistics", get(statistics))
        .route("/health", get(health))
}
