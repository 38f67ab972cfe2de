//! Prediction history: a JSON array of records on disk.
//!
//! Writers go through one [`PredictionLog`] per process. Each append reads the
//! array, adds the record and replaces the file through a temporary sibling,
//! all under a mutex, so concurrent requests never drop each other's records.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const NO_LOGS_MESSAGE: &str = "No prediction logs found";

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Prediction log {} is not a JSON array", .0.display())]
    NotAnArray(PathBuf),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct PredictionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// The fields statistics need; anything else in an entry is ignored.
#[derive(Debug, Deserialize)]
struct LoggedPrediction {
    #[serde(default)]
    success: bool,
    predicted_class: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionStatistics {
    pub total_predictions: usize,
    pub successful_predictions: usize,
    pub failed_predictions: usize,
    pub class_distribution: BTreeMap<String, usize>,
    pub average_confidence: Option<f64>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
}

/// Aggregates of the log, or an explicit marker when there is nothing logged.
#[derive(Debug, Clone, PartialEq)]
pub enum LogStatistics {
    NoLogs,
    Summary(PredictionStatistics),
}

impl LogStatistics {
    pub fn summary(&self) -> Option<&PredictionStatistics> {
        match self {
            Self::Summary(stats) => Some(stats),
            Self::NoLogs => None,
        }
    }
}

impl Serialize for LogStatistics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Summary(stats) => stats.serialize(serializer),
            Self::NoLogs => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", NO_LOGS_MESSAGE)?;
                map.end()
            }
        }
    }
}

impl PredictionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries currently on disk; a missing or empty file has none.
    fn read_entries(&self) -> Result<Vec<Value>, LogError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&content)? {
            Value::Array(entries) => Ok(entries),
            _ => Err(LogError::NotAnArray(self.path.clone())),
        }
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), LogError> {
        let entry = serde_json::to_value(record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.read_entries()?;
        entries.push(entry);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Prediction logged");
        Ok(())
    }

    pub fn statistics(&self) -> Result<LogStatistics, LogError> {
        let entries = self.read_entries()?;
        if entries.is_empty() {
            return Ok(LogStatistics::NoLogs);
        }

        let total = entries.len();
        let mut successful = 0;
        let mut class_distribution = BTreeMap::new();
        let mut confidences = Vec::new();

        for entry in entries {
            // Entries that are not objects count as failed predictions
            let Ok(logged) = serde_json::from_value::<LoggedPrediction>(entry) else {
                continue;
            };
            if !logged.success {
                continue;
            }
            successful += 1;
            if let Some(class) = logged.predicted_class.filter(|c| !c.is_empty()) {
                *class_distribution.entry(class).or_insert(0) += 1;
            }
            if let Some(confidence) = logged.confidence {
                confidences.push(confidence);
            }
        }

        let average_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        Ok(LogStatistics::Summary(PredictionStatistics {
            total_predictions: total,
            successful_predictions: successful,
            failed_predictions: total - successful,
            class_distribution,
            average_confidence,
            min_confidence: confidences.iter().copied().reduce(f64::min),
            max_confidence: confidences.iter().copied().reduce(f64::max),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_missing_and_empty_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("logs/predictions.json"));

        let stats = log.statistics().unwrap();
        assert_eq!(stats, LogStatistics::NoLogs);
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({"error": "No prediction logs found"})
        );

        fs::create_dir_all(dir.path().join("logs")).unwrap();
        fs::write(log.path(), "[]").unwrap();
        assert_eq!(log.statistics().unwrap(), LogStatistics::NoLogs);
    }

    #[test]
    fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("predictions.json"));

        log.append(&json!({"success": true, "predicted_class": "healthy", "confidence": 0.9}))
            .unwrap();
        log.append(&json!({"success": true, "predicted_class": "healthy", "confidence": 0.5}))
            .unwrap();
        log.append(&json!({"success": true, "predicted_class": "diseased", "confidence": 0.7}))
            .unwrap();
        log.append(&json!({"success": false, "error": "bad image"})).unwrap();

        let stats = log.statistics().unwrap();
        let stats = stats.summary().unwrap();
        assert_eq!(stats.total_predictions, 4);
        assert_eq!(stats.successful_predictions, 3);
        assert_eq!(stats.failed_predictions, 1);
        assert_eq!(stats.class_distribution["healthy"], 2);
        assert_eq!(stats.min_confidence, Some(0.5));
        assert_eq!(stats.max_confidence, Some(0.9));
        assert!((stats.average_confidence.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_only_failures_have_no_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("predictions.json"));
        log.append(&json!({"success": false, "error": "x"})).unwrap();

        let stats = log.statistics().unwrap();
        let stats = stats.summary().unwrap();
        assert_eq!(stats.failed_predictions, 1);
        assert_eq!(stats.average_confidence, None);
    }

    #[test]
    fn test_concurrent_appends_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(PredictionLog::new(dir.path().join("predictions.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for j in 0..5 {
                        log.append(&json!({"success": true, "n": i * 10 + j})).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = log.statistics().unwrap();
        assert_eq!(stats.summary().unwrap().total_predictions, 40);
    }

    #[test]
    fn test_corrupt_log_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("predictions.json"));
        fs::write(log.path(), "{\"not\": \"an array\"}").unwrap();

        assert!(matches!(log.append(&json!({})), Err(LogError::NotAnArray(_))));
        assert!(fs::read_to_string(log.path()).unwrap().contains("not"));
    }
}
