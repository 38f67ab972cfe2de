use std::fs;
use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::metrics::MetricsCollector;
use crate::prediction::PredictionLog;
use crate::retrain::{ClassifierRetrain, RetrainJob, Retrainer};
use crate::serving::ServiceHandle;
use crate::uploads::UploadStore;

/// Everything the request handlers share.
pub struct AppState {
    pub config: AppConfig,
    pub services: Arc<ServiceHandle>,
    pub log: PredictionLog,
    pub uploads: UploadStore,
    pub retrainer: Box<dyn RetrainJob>,
    pub metrics: MetricsCollector,
}

impl AppState {
    /// Prepares the working directories and tries to load the serving model.
    ///
    /// A missing or broken model is logged, not fatal: the server starts and
    /// prediction endpoints answer 503 until a model is loaded.
    pub fn new(config: AppConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.upload_dir)?;
        if let Some(parent) = config.prediction_log.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let services = Arc::new(ServiceHandle::new(
            &config.model_path,
            &config.class_indices_path,
        ));
        if services.reload().is_err() {
            warn!("No serving model yet; train one with `vista train` and retrain or restart");
        }

        let retrainer = Retrainer::new(ClassifierRetrain::new(
            config.retrain_settings(),
            Arc::clone(&services),
        ));

        Ok(Self {
            log: PredictionLog::new(&config.prediction_log),
            uploads: UploadStore::new(&config.upload_dir, &config.train_dir),
            retrainer: Box::new(retrainer),
            metrics: MetricsCollector::new(),
            services,
            config,
        })
    }

    pub fn with_retrainer(mut self, retrainer: impl RetrainJob + 'static) -> Self {
        self.retrainer = Box::new(retrainer);
        self
    }
}
