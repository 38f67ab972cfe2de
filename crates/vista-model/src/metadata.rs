use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use vista_core::ImageSize;

use crate::error::{ModelError, Result};
use crate::network::DEFAULT_BACKBONE_CHANNELS;

pub const SAVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// JSON sidecar written next to every saved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// `[height, width]`
    pub img_size: [u32; 2],
    pub num_classes: usize,
    pub learning_rate: f64,
    pub saved_at: String,
    #[serde(default = "default_backbone_channels")]
    pub backbone_channels: Vec<usize>,
}

fn default_backbone_channels() -> Vec<usize> {
    DEFAULT_BACKBONE_CHANNELS.to_vec()
}

impl ModelMetadata {
    pub fn new(
        image_size: ImageSize,
        num_classes: usize,
        learning_rate: f64,
        backbone_channels: Vec<usize>,
    ) -> Self {
        Self {
            img_size: [image_size.height, image_size.width],
            num_classes,
            learning_rate,
            saved_at: Local::now().format(SAVED_AT_FORMAT).to_string(),
            backbone_channels,
        }
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(self.img_size[0], self.img_size[1])
    }

    /// Write the sidecar belonging to `model_path`.
    pub fn save(&self, model_path: &Path) -> Result<PathBuf> {
        let path = metadata_path(model_path);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Read the sidecar belonging to `model_path`.
    pub fn load(model_path: &Path) -> Result<Self> {
        let path = metadata_path(model_path);
        if !path.exists() {
            return Err(ModelError::load(
                model_path,
                format!("metadata file {} is missing", path.display()),
            ));
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| ModelError::load(&path, e))
    }
}

/// `models/image_classifier.mpk` -> `models/image_classifier_metadata.json`
pub fn metadata_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    model_path.with_file_name(format!("{stem}_metadata.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            metadata_path(Path::new("models/image_classifier.mpk")),
            PathBuf::from("models/image_classifier_metadata.json")
        );
        assert_eq!(
            metadata_path(Path::new("best_model")),
            PathBuf::from("best_model_metadata.json")
        );
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("m.mpk");
        let meta = ModelMetadata::new(ImageSize::new(64, 96), 3, 1e-4, vec![8, 16]);

        let written = meta.save(&model_path).unwrap();
        assert!(written.ends_with("m_metadata.json"));

        let loaded = ModelMetadata::load(&model_path).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.image_size(), ImageSize::new(64, 96));
    }

    #[test]
    fn test_missing_channels_use_default() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("legacy.mpk");
        fs::write(
            metadata_path(&model_path),
            r#"{"img_size":[224,224],"num_classes":2,"learning_rate":0.0001,"saved_at":"2024-01-01 00:00:00"}"#,
        )
        .unwrap();

        let loaded = ModelMetadata::load(&model_path).unwrap();
        assert_eq!(loaded.backbone_channels, DEFAULT_BACKBONE_CHANNELS);
    }

    #[test]
    fn test_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelMetadata::load(&dir.path().join("none.mpk")).unwrap_err();
        assert!(matches!(err, ModelError::ModelLoad { .. }));
    }
}
