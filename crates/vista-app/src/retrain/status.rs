use chrono::{DateTime, Local};
use serde::Serialize;
use vista_model::EpochMetrics;

/// Steps of a retraining run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainStage {
    Initializing,
    LoadingData,
    Training,
    Saving,
    Reloading,
    Completed,
}

impl RetrainStage {
    pub fn progress(&self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::LoadingData => 10,
            Self::Training => 30,
            Self::Saving => 80,
            Self::Reloading => 90,
            Self::Completed => 100,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing retraining...",
            Self::LoadingData => "Loading data...",
            Self::Training => "Retraining model...",
            Self::Saving => "Saving retrained model...",
            Self::Reloading => "Reloading model...",
            Self::Completed => "Retraining completed successfully!",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Snapshot of the retraining job as pollers see it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrainingStatus {
    pub is_running: bool,
    /// 0 to 100
    pub progress: u8,
    pub message: String,
    pub last_retrain_time: Option<DateTime<Local>>,
}

impl RetrainingStatus {
    pub fn enter(&mut self, stage: RetrainStage) {
        self.progress = stage.progress();
        self.message = stage.message().to_string();
        if stage.is_complete() {
            self.last_retrain_time = Some(Local::now());
        }
    }

    /// Spread finished epochs over the training share of the progress bar.
    pub fn record_epoch(&mut self, metrics: &EpochMetrics) {
        let start = RetrainStage::Training.progress() as usize;
        let span = (RetrainStage::Saving.progress() - RetrainStage::Training.progress()) as usize;
        let total = metrics.total_epochs.max(1);
        let done = (metrics.epoch + 1).min(total);

        self.progress = (start + span * done / total) as u8;
        self.message = format!(
            "{} epoch {done}/{total}, val_accuracy {:.4}",
            RetrainStage::Training.message(),
            metrics.val_accuracy
        );
    }

    pub fn fail(&mut self, error: &str) {
        self.progress = 0;
        self.message = format!("Error during retraining: {error}");
    }
}
