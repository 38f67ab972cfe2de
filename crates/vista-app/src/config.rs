use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use vista_core::ImageSize;

use crate::retrain::RetrainSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Cannot read .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub model_dir: PathBuf,
    pub model_path: PathBuf,
    pub class_indices_path: PathBuf,
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub prediction_log: PathBuf,
    pub img_size: u32,
    pub batch_size: usize,
    pub validation_split: f32,
    pub retrain_epochs: usize,
    pub learning_rate: f64,
    pub max_upload_bytes: usize,
    pub seed: u64,
    pub backbone_weights: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            model_dir: PathBuf::from("models"),
            model_path: PathBuf::from("models/image_classifier.mpk"),
            class_indices_path: PathBuf::from("models/class_indices.json"),
            train_dir: PathBuf::from("data/train"),
            test_dir: PathBuf::from("data/test"),
            upload_dir: PathBuf::from("data/uploaded"),
            prediction_log: PathBuf::from("logs/predictions.json"),
            img_size: 128,
            batch_size: 32,
            validation_split: 0.2,
            retrain_epochs: 10,
            learning_rate: 1e-4,
            max_upload_bytes: 16 * 1024 * 1024,
            seed: 42,
            backbone_weights: None,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| invalid(key, &value, e)),
        None => Ok(default),
    }
}

fn path(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: PathBuf) -> PathBuf {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

impl AppConfig {
    /// Environment variables, after loading `.env` from the working directory if present.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Artifact paths follow the model directory unless set explicitly
        let model_dir = path(&lookup, "VISTA_MODEL_DIR", defaults.model_dir);
        let model_path = path(&lookup, "VISTA_MODEL_PATH", model_dir.join("image_classifier.mpk"));
        let class_indices_path = path(
            &lookup,
            "VISTA_CLASS_INDICES",
            model_dir.join("class_indices.json"),
        );

        let config = Self {
            port: parsed(&lookup, "VISTA_PORT", defaults.port)?,
            model_dir,
            model_path,
            class_indices_path,
            train_dir: path(&lookup, "VISTA_TRAIN_DIR", defaults.train_dir),
            test_dir: path(&lookup, "VISTA_TEST_DIR", defaults.test_dir),
            upload_dir: path(&lookup, "VISTA_UPLOAD_DIR", defaults.upload_dir),
            prediction_log: path(&lookup, "VISTA_PREDICTION_LOG", defaults.prediction_log),
            img_size: parsed(&lookup, "VISTA_IMG_SIZE", defaults.img_size)?,
            batch_size: parsed(&lookup, "VISTA_BATCH_SIZE", defaults.batch_size)?,
            validation_split: parsed(&lookup, "VISTA_VALIDATION_SPLIT", defaults.validation_split)?,
            retrain_epochs: parsed(&lookup, "VISTA_RETRAIN_EPOCHS", defaults.retrain_epochs)?,
            learning_rate: parsed(&lookup, "VISTA_LEARNING_RATE", defaults.learning_rate)?,
            max_upload_bytes: parsed(&lookup, "VISTA_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            seed: parsed(&lookup, "VISTA_SEED", defaults.seed)?,
            backbone_weights: lookup("VISTA_BACKBONE_WEIGHTS")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.img_size == 0 {
            return Err(invalid("VISTA_IMG_SIZE", "0", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("VISTA_BATCH_SIZE", "0", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(invalid(
                "VISTA_VALIDATION_SPLIT",
                &self.validation_split.to_string(),
                "must be in [0, 1)",
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(invalid(
                "VISTA_LEARNING_RATE",
                &self.learning_rate.to_string(),
                "must be positive",
            ));
        }
        Ok(())
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::square(self.img_size)
    }

    pub fn retrain_settings(&self) -> RetrainSettings {
        RetrainSettings {
            train_dir: self.train_dir.clone(),
            model_path: self.model_path.clone(),
            class_indices_path: self.class_indices_path.clone(),
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            epochs: self.retrain_epochs,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.image_size(), ImageSize::square(128));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("VISTA_PORT", "8080"),
            ("VISTA_MODEL_DIR", "/srv/models"),
            ("VISTA_VALIDATION_SPLIT", "0.1"),
            ("VISTA_BACKBONE_WEIGHTS", "weights/backbone.mpk"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.model_path, PathBuf::from("/srv/models/image_classifier.mpk"));
        assert_eq!(config.class_indices_path, PathBuf::from("/srv/models/class_indices.json"));
        assert_eq!(config.validation_split, 0.1);
        assert_eq!(config.backbone_weights, Some(PathBuf::from("weights/backbone.mpk")));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        let err = config_from(&[("VISTA_PORT", "fifty")]).unwrap_err();
        assert!(err.to_string().starts_with("VISTA_PORT"));

        assert!(config_from(&[("VISTA_VALIDATION_SPLIT", "1.5")]).is_err());
        assert!(config_from(&[("VISTA_BATCH_SIZE", "0")]).is_err());
    }
}
