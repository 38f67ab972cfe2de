use serde::Serialize;
use vista_core::DatasetStatistics;

use crate::prediction::LogStatistics;
use crate::retrain::RetrainingStatus;

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub class_label: String,
    pub uploaded: usize,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainStartResponse {
    pub message: String,
    pub status: RetrainingStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsResponse {
    pub dataset: DatasetStatistics,
    pub predictions: LogStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub retraining: bool,
}
