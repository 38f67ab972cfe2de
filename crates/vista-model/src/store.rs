//! Model artifacts on disk: a named MessagePack record plus the JSON sidecar.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::error::{ModelError, Result};
use crate::metadata::ModelMetadata;
use crate::network::{Backbone, Network, NetworkConfig};

pub const MODEL_EXTENSION: &str = "mpk";

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// The record file actually written for `path` (extension forced to `.mpk`).
pub fn model_file(path: &Path) -> PathBuf {
    path.with_extension(MODEL_EXTENSION)
}

pub fn save_network<B: Backend>(
    network: &Network<B>,
    path: &Path,
    metadata: &ModelMetadata,
) -> Result<PathBuf> {
    let file = model_file(path);
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    network
        .clone()
        .save_file(&file, &Recorder::new())
        .map_err(|e| ModelError::save(&file, e))?;
    let sidecar = metadata.save(&file)?;

    info!(model = %file.display(), metadata = %sidecar.display(), "Saved model");
    Ok(file)
}

/// Rebuild the architecture described by the sidecar, then load the weights into it.
pub fn load_network<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(Network<B>, ModelMetadata)> {
    let file = model_file(path);
    if !file.exists() {
        return Err(ModelError::ModelFileNotFound(file));
    }

    let metadata = ModelMetadata::load(&file)?;
    let network = NetworkConfig::new(metadata.num_classes)
        .with_backbone_channels(metadata.backbone_channels.clone())
        .init::<B>(device)
        .load_file(&file, &Recorder::new(), device)
        .map_err(|e| ModelError::load(&file, e))?;

    info!(model = %file.display(), classes = metadata.num_classes, "Loaded model");
    Ok((network, metadata))
}

/// Pretrained feature extractor weights, saved from a `Backbone` of the same shape.
pub fn load_backbone<B: Backend>(
    backbone: Backbone<B>,
    path: &Path,
    device: &B::Device,
) -> Result<Backbone<B>> {
    let file = model_file(path);
    if !file.exists() {
        return Err(ModelError::ModelFileNotFound(file));
    }
    backbone
        .load_file(&file, &Recorder::new(), device)
        .map_err(|e| ModelError::load(&file, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ServeBackend, default_device};
    use burn::tensor::Tensor;
    use vista_core::ImageSize;

    #[test]
    fn test_weights_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let device = default_device();
        let config = NetworkConfig::new(2)
            .with_backbone_channels(vec![4])
            .with_hidden(4)
            .with_hidden_small(4);
        let net = config.init::<ServeBackend>(&device);
        let meta = ModelMetadata::new(ImageSize::square(8), 2, 1e-3, vec![4]);

        let path = dir.path().join("nested/net.mpk");
        save_network(&net, &path, &meta).unwrap();
        let (loaded, loaded_meta) = load_network::<ServeBackend>(&path, &device).unwrap();
        assert_eq!(loaded_meta, meta);

        let input = Tensor::<ServeBackend, 4>::ones([1, 3, 8, 8], &device);
        let a = net.probabilities(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.probabilities(input).into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let device = default_device();

        let missing = load_network::<ServeBackend>(&dir.path().join("nope.mpk"), &device);
        assert!(matches!(missing, Err(ModelError::ModelFileNotFound(_))));

        let corrupt = dir.path().join("bad.mpk");
        fs::write(&corrupt, b"not a record").unwrap();
        ModelMetadata::new(ImageSize::square(8), 2, 1e-3, vec![4])
            .save(&corrupt)
            .unwrap();
        let err = load_network::<ServeBackend>(&corrupt, &device).unwrap_err();
        assert!(matches!(err, ModelError::ModelLoad { .. }));
    }
}
