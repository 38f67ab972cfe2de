use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::activation::softmax;
use tracing::{info, warn};
use vista_core::{DirectoryIterator, ImageSize, ImageTensor};

use crate::backend::{Device, ServeBackend, TrainBackend, default_device};
use crate::error::{ModelError, Result};
use crate::history::{EpochMetrics, Evaluation, TrainingHistory};
use crate::metadata::ModelMetadata;
use crate::network::{DEFAULT_BACKBONE_CHANNELS, Network, NetworkConfig};
use crate::store::{load_backbone, load_network, save_network};
use crate::trainer::{Checkpoint, TrainSettings, argmax, evaluate, fit, image_tensor, to_host};

pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;
pub const BEST_CHECKPOINT_FILE: &str = "best_model.mpk";

/// Outcome of one forward pass for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Largest probability
    pub confidence: f32,
    /// Softmax output, by class index
    pub probabilities: Vec<f32>,
}

impl Prediction {
    fn from_probabilities(probabilities: Vec<f32>) -> Self {
        let class_index = argmax(&probabilities);
        Self {
            class_index,
            confidence: probabilities[class_index],
            probabilities,
        }
    }
}

/// Feature extractor plus classification head, with its training lifecycle.
///
/// Nothing can run before [`ImageClassifier::create`] or
/// [`ImageClassifier::load`]; those fail every other operation with
/// [`ModelError::NotInitialized`].
#[derive(Debug)]
pub struct ImageClassifier {
    image_size: ImageSize,
    num_classes: usize,
    learning_rate: f64,
    backbone_channels: Vec<usize>,
    backbone_weights: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    class_weights: Option<Vec<f32>>,
    device: Device,
    network: Option<Network<TrainBackend>>,
    inference: Option<Network<ServeBackend>>,
    frozen_blocks: usize,
    history: Option<TrainingHistory>,
}

impl ImageClassifier {
    pub fn new(image_size: ImageSize, num_classes: usize, learning_rate: f64) -> Self {
        Self {
            image_size,
            num_classes,
            learning_rate,
            backbone_channels: DEFAULT_BACKBONE_CHANNELS.to_vec(),
            backbone_weights: None,
            checkpoint_dir: None,
            class_weights: None,
            device: default_device(),
            network: None,
            inference: None,
            frozen_blocks: 0,
            history: None,
        }
    }

    pub fn with_backbone_channels(mut self, channels: Vec<usize>) -> Self {
        self.backbone_channels = channels;
        self
    }

    /// Pretrained weights for the feature extractor, applied by `create`.
    pub fn with_backbone_weights(mut self, path: Option<PathBuf>) -> Self {
        self.backbone_weights = path;
        self
    }

    /// Directory for the best-validation-accuracy checkpoint.
    pub fn with_checkpoint_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.checkpoint_dir = dir;
        self
    }

    pub fn set_class_weights(&mut self, weights: Option<Vec<f32>>) {
        self.class_weights = weights;
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn is_initialized(&self) -> bool {
        self.network.is_some()
    }

    /// Feature blocks currently excluded from training
    pub fn frozen_blocks(&self) -> usize {
        self.frozen_blocks
    }

    pub fn history(&self) -> Option<&TrainingHistory> {
        self.history.as_ref()
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata::new(
            self.image_size,
            self.num_classes,
            self.learning_rate,
            self.backbone_channels.clone(),
        )
    }

    fn install(&mut self, network: Network<TrainBackend>) {
        self.inference = Some(network.valid());
        self.network = Some(network);
    }

    fn take_network(&mut self) -> Result<Network<TrainBackend>> {
        self.network.take().ok_or(ModelError::NotInitialized)
    }

    fn inference(&self) -> Result<&Network<ServeBackend>> {
        self.inference.as_ref().ok_or(ModelError::NotInitialized)
    }

    /// Build a fresh network with the feature extractor frozen.
    ///
    /// Calling it again replaces the previous network.
    pub fn create(&mut self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(ModelError::InvalidConfig("at least one class is required".into()));
        }
        if self.backbone_channels.is_empty() {
            return Err(ModelError::InvalidConfig("backbone needs at least one block".into()));
        }

        let mut network = NetworkConfig::new(self.num_classes)
            .with_backbone_channels(self.backbone_channels.clone())
            .init::<TrainBackend>(&self.device);

        match &self.backbone_weights {
            Some(path) => {
                network.backbone = load_backbone(network.backbone, path, &self.device)?;
                info!(weights = %path.display(), "Loaded pretrained feature extractor");
            }
            None => warn!(
                "No pretrained feature extractor weights configured, starting from random init"
            ),
        }

        self.frozen_blocks = network.num_blocks();
        self.history = None;
        self.install(network);
        info!(
            classes = self.num_classes,
            height = self.image_size.height,
            width = self.image_size.width,
            "Created classifier"
        );
        Ok(())
    }

    fn check_data(&self, train: &DirectoryIterator) -> Result<()> {
        if train.num_classes() != self.num_classes {
            return Err(ModelError::InvalidConfig(format!(
                "dataset has {} classes, model expects {}",
                train.num_classes(),
                self.num_classes
            )));
        }
        if let Some(weights) = &self.class_weights {
            if weights.len() != self.num_classes {
                return Err(ModelError::InvalidConfig(format!(
                    "{} class weights for {} classes",
                    weights.len(),
                    self.num_classes
                )));
            }
        }
        Ok(())
    }

    fn run(
        &mut self,
        train: &DirectoryIterator,
        val: &DirectoryIterator,
        epochs: usize,
        learning_rate: f64,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<TrainingHistory> {
        if !self.is_initialized() {
            return Err(ModelError::NotInitialized);
        }
        self.check_data(train)?;

        let mut settings = TrainSettings::new(epochs, learning_rate, self.frozen_blocks);
        settings.class_weights = self.class_weights.clone();
        settings.checkpoint = self.checkpoint_dir.as_ref().map(|dir| Checkpoint {
            path: dir.join(BEST_CHECKPOINT_FILE),
            metadata: self.metadata(),
        });

        let network = self.take_network()?;
        let backup = network.clone();
        match fit(network, train, val, &settings, &self.device, on_epoch) {
            Ok((network, history)) => {
                self.install(network);
                self.history = Some(history.clone());
                Ok(history)
            }
            Err(e) => {
                self.install(backup);
                Err(e)
            }
        }
    }

    /// Train the head (and any unfrozen blocks) at the base learning rate.
    pub fn train(
        &mut self,
        train: &DirectoryIterator,
        val: &DirectoryIterator,
        epochs: usize,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<TrainingHistory> {
        self.run(train, val, epochs, self.learning_rate, on_epoch)
    }

    /// Unfreeze feature blocks from `unfreeze_from` onward and continue at a tenth of the rate.
    pub fn fine_tune(
        &mut self,
        train: &DirectoryIterator,
        val: &DirectoryIterator,
        epochs: usize,
        unfreeze_from: usize,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<TrainingHistory> {
        let network = self.network.as_ref().ok_or(ModelError::NotInitialized)?;
        self.frozen_blocks = unfreeze_from.min(network.num_blocks());
        info!(frozen_blocks = self.frozen_blocks, "Fine-tuning");
        self.run(train, val, epochs, self.learning_rate / 10.0, on_epoch)
    }

    /// Load `pretrained`, unfreeze everything and train at a tenth of the rate.
    pub fn retrain(
        &mut self,
        train: &DirectoryIterator,
        val: &DirectoryIterator,
        pretrained: &Path,
        epochs: usize,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<TrainingHistory> {
        self.load(pretrained)?;
        self.frozen_blocks = 0;
        info!(samples = train.len(), "Retraining from {}", pretrained.display());
        self.run(train, val, epochs, self.learning_rate / 10.0, on_epoch)
    }

    pub fn evaluate(&self, test: &DirectoryIterator) -> Result<Evaluation> {
        evaluate(self.inference()?, test, &self.device)
    }

    /// Predict the first image of `images`.
    pub fn predict(&self, images: &ImageTensor) -> Result<Prediction> {
        self.predict_batch(images)?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Output("empty input batch".into()))
    }

    pub fn predict_batch(&self, images: &ImageTensor) -> Result<Vec<Prediction>> {
        let network = self.inference()?;
        if images.batch_size() == 0 {
            return Ok(Vec::new());
        }

        let input = image_tensor::<ServeBackend>(images, &self.device);
        let probabilities = to_host(softmax(network.forward(input, 0), 1))?;
        Ok(probabilities
            .chunks(self.num_classes)
            .map(|row| Prediction::from_probabilities(row.to_vec()))
            .collect())
    }

    /// Write weights and the metadata sidecar.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        save_network(self.inference()?, path, &self.metadata())
    }

    /// Replace the network with the one saved at `path`, adopting its metadata.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let (network, metadata) = load_network::<TrainBackend>(path, &self.device)?;
        if metadata.num_classes == 0 {
            return Err(ModelError::load(path, "metadata declares no classes"));
        }
        self.image_size = metadata.image_size();
        self.num_classes = metadata.num_classes;
        self.learning_rate = metadata.learning_rate;
        self.backbone_channels = metadata.backbone_channels;
        self.frozen_blocks = network.num_blocks();
        self.history = None;
        self.install(network);
        Ok(())
    }

    pub fn summary(&self) -> Result<String> {
        let network = self.inference()?;
        Ok(network.summary(self.frozen_blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use vista_core::build_train_iterators;
    use vista_core::synthetic::solid_square;

    const SIDE: u32 = 16;

    fn tiny(num_classes: usize) -> ImageClassifier {
        ImageClassifier::new(ImageSize::square(SIDE), num_classes, 1e-3)
            .with_backbone_channels(vec![4, 8])
    }

    fn write_dataset(root: &Path) {
        for (label, color) in [("blue", [0, 0, 255]), ("red", [255, 0, 0])] {
            let dir = root.join(label);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..4 {
                solid_square(color, SIDE).save(dir.join(format!("{i}.png"))).unwrap();
            }
        }
    }

    #[test]
    fn test_not_initialized() {
        let clf = tiny(2);
        let images = ImageTensor::from_images(&[solid_square([1, 2, 3], SIDE)], clf.image_size());
        assert!(matches!(clf.predict(&images), Err(ModelError::NotInitialized)));
        assert!(matches!(clf.summary(), Err(ModelError::NotInitialized)));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            clf.save(&dir.path().join("x.mpk")),
            Err(ModelError::NotInitialized)
        ));
    }

    #[test]
    fn test_predict_probabilities() {
        let mut clf = tiny(3);
        clf.create().unwrap();
        assert_eq!(clf.frozen_blocks(), 2);

        let images = ImageTensor::from_images(
            &[solid_square([9, 9, 9], SIDE), solid_square([200, 0, 0], SIDE)],
            clf.image_size(),
        );
        let predictions = clf.predict_batch(&images).unwrap();
        assert_eq!(predictions.len(), 2);
        for p in &predictions {
            assert_eq!(p.probabilities.len(), 3);
            assert!((p.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            let max = p.probabilities.iter().cloned().fold(f32::MIN, f32::max);
            assert_eq!(p.confidence, max);
            assert_eq!(p.probabilities[p.class_index], max);
        }
    }

    #[test]
    fn test_train_and_reload() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let (train, val) =
            build_train_iterators(data.path(), ImageSize::square(SIDE), 4, 0.25, 7).unwrap();

        let models = tempfile::tempdir().unwrap();
        let mut clf = tiny(2).with_checkpoint_dir(Some(models.path().to_path_buf()));
        clf.create().unwrap();

        let mut seen = Vec::new();
        let history = clf
            .train(&train, &val, 2, &mut |m: &EpochMetrics| seen.push(m.epoch))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(seen, [0, 1]);
        assert!(models.path().join(BEST_CHECKPOINT_FILE).exists());

        let path = models.path().join("image_classifier.mpk");
        clf.save(&path).unwrap();

        let mut reloaded = ImageClassifier::new(ImageSize::square(64), 7, 0.5);
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.image_size(), clf.image_size());
        assert_eq!(reloaded.num_classes(), 2);
        assert_eq!(reloaded.learning_rate(), 1e-3);

        let eval = reloaded.evaluate(&val).unwrap();
        assert!((0.0..=1.0).contains(&eval.accuracy));

        let history = reloaded
            .retrain(&train, &val, &path, 1, &mut |_: &EpochMetrics| {})
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(reloaded.frozen_blocks(), 0);
    }

    #[test]
    fn test_class_count_mismatch() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let (train, val) =
            build_train_iterators(data.path(), ImageSize::square(SIDE), 4, 0.25, 7).unwrap();

        let mut clf = tiny(3);
        clf.create().unwrap();
        let err = clf.train(&train, &val, 1, &mut |_: &EpochMetrics| {}).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
        // The network survives a rejected run
        assert!(clf.is_initialized());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut clf = tiny(2);
        let err = clf.load(&dir.path().join("missing.mpk")).unwrap_err();
        assert!(matches!(err, ModelError::ModelFileNotFound(_)));
        assert_eq!(err.kind(), vista_core::ErrorKind::ModelFileNotFound);
    }
}
