use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::prediction::{PredictionService, ServiceInitError};

pub const MODEL_NOT_LOADED: &str = "Model not loaded";

#[derive(Debug)]
struct Loaded {
    service: Arc<PredictionService>,
    loaded_at: Instant,
}

/// The prediction service currently answering requests.
///
/// Readers clone the `Arc` and keep using it for the whole request, so a swap
/// never disturbs a prediction already in flight.
#[derive(Debug)]
pub struct ServiceHandle {
    model_path: PathBuf,
    class_indices_path: PathBuf,
    current: RwLock<Option<Loaded>>,
}

impl ServiceHandle {
    /// An empty handle; nothing is served until [`ServiceHandle::reload`] succeeds.
    pub fn new(model_path: impl Into<PathBuf>, class_indices_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            class_indices_path: class_indices_path.into(),
            current: RwLock::new(None),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn class_indices_path(&self) -> &Path {
        &self.class_indices_path
    }

    pub fn get(&self) -> Option<Arc<PredictionService>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().map(|loaded| Arc::clone(&loaded.service))
    }

    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn install(&self, service: PredictionService) -> Arc<PredictionService> {
        let service = Arc::new(service);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(Loaded {
            service: Arc::clone(&service),
            loaded_at: Instant::now(),
        });
        service
    }

    /// Build a service from the configured paths and swap it in.
    ///
    /// On failure the previous service, if any, keeps serving.
    pub fn reload(&self) -> Result<Arc<PredictionService>, ServiceInitError> {
        match PredictionService::new(&self.model_path, &self.class_indices_path) {
            Ok(service) => {
                let service = self.install(service);
                info!(model = %self.model_path.display(), "Serving model loaded");
                Ok(service)
            }
            Err(e) => {
                warn!(
                    model = %self.model_path.display(),
                    kept_previous = self.is_loaded(),
                    "Failed to load serving model: {e}"
                );
                Err(e)
            }
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().map(|loaded| loaded.loaded_at.elapsed())
    }

    /// Time since the serving model was loaded, or [`MODEL_NOT_LOADED`].
    pub fn uptime_string(&self) -> String {
        self.uptime()
            .map(format_uptime)
            .unwrap_or_else(|| MODEL_NOT_LOADED.to_string())
    }
}

/// `"{days}d {hours}h {minutes}m {seconds}s"`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let minutes = secs % 3_600 / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::service::tests::write_model;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 0h 0m 0s");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5)),
            "2d 3h 4m 5s"
        );
    }

    #[test]
    fn test_empty_handle() {
        let handle = ServiceHandle::new("none.mpk", "none.json");
        assert!(handle.get().is_none());
        assert!(!handle.is_loaded());
        assert_eq!(handle.uptime_string(), MODEL_NOT_LOADED);
        assert!(handle.reload().is_err());
    }

    #[test]
    fn test_failed_reload_keeps_previous_service() {
        let dir = tempfile::tempdir().unwrap();
        let (model, index) = write_model(dir.path());
        let handle = ServiceHandle::new(&model, &index);

        let first = handle.reload().unwrap();
        assert!(handle.is_loaded());
        assert!(handle.uptime_string().ends_with('s'));

        std::fs::write(&model, b"corrupt").unwrap();
        assert!(handle.reload().is_err());
        let current = handle.get().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }
}
