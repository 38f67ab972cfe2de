use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local};
use tracing::info;
use vista_core::{ClassIndex, DirectoryIterator, build_train_iterators};
use vista_model::{DEFAULT_LEARNING_RATE, EpochMetrics, ImageClassifier, ModelMetadata, model_file};

use crate::serving::ServiceHandle;

/// The stages a retraining run goes through; the worker reports progress between them.
pub trait RetrainSteps: Send + Sync + 'static {
    type Data: Send;
    type Trained: Send;

    fn load_data(&self) -> anyhow::Result<Self::Data>;

    fn retrain(
        &self,
        data: Self::Data,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> anyhow::Result<Self::Trained>;

    /// Persist the result; returns the path of the archived copy.
    fn save(&self, trained: &Self::Trained) -> anyhow::Result<PathBuf>;

    /// Swap the new model into serving.
    fn reload(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RetrainSettings {
    pub train_dir: PathBuf,
    pub model_path: PathBuf,
    pub class_indices_path: PathBuf,
    pub batch_size: usize,
    pub validation_split: f32,
    pub epochs: usize,
    pub seed: u64,
}

/// `models/image_classifier.mpk` -> `models/image_classifier_retrained_20250101_120000.mpk`
pub fn retrained_model_path(model_path: &Path, at: DateTime<Local>) -> PathBuf {
    let model_path = model_file(model_path);
    let stem = model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model");
    let name = format!("{stem}_retrained_{}", at.format("%Y%m%d_%H%M%S"));
    model_file(&model_path.with_file_name(name))
}

pub struct RetrainData {
    pub train: DirectoryIterator,
    pub val: DirectoryIterator,
}

pub struct Retrained {
    pub classifier: ImageClassifier,
    pub class_index: ClassIndex,
}

/// Retrains the serving model on the training directory and hot-reloads it.
#[derive(Debug)]
pub struct ClassifierRetrain {
    settings: RetrainSettings,
    services: Arc<ServiceHandle>,
}

impl ClassifierRetrain {
    pub fn new(settings: RetrainSettings, services: Arc<ServiceHandle>) -> Self {
        Self { settings, services }
    }
}

impl RetrainSteps for ClassifierRetrain {
    type Data = RetrainData;
    type Trained = Retrained;

    fn load_data(&self) -> anyhow::Result<RetrainData> {
        // Images are fed at the resolution the serving model was built for
        let metadata = ModelMetadata::load(&self.settings.model_path)?;
        let (train, val) = build_train_iterators(
            &self.settings.train_dir,
            metadata.image_size(),
            self.settings.batch_size,
            self.settings.validation_split,
            self.settings.seed,
        )
        .with_context(|| format!("loading {}", self.settings.train_dir.display()))?;
        Ok(RetrainData { train, val })
    }

    fn retrain(
        &self,
        data: RetrainData,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> anyhow::Result<Retrained> {
        let RetrainData { train, val } = data;
        let mut classifier =
            ImageClassifier::new(train.image_size(), train.num_classes(), DEFAULT_LEARNING_RATE)
                .with_checkpoint_dir(self.settings.model_path.parent().map(Path::to_path_buf));

        let history = classifier.retrain(
            &train,
            &val,
            &self.settings.model_path,
            self.settings.epochs,
            on_epoch,
        )?;
        info!(
            epochs = history.len(),
            best_val_accuracy = ?history.best_val_accuracy(),
            "Retraining finished"
        );

        Ok(Retrained {
            classifier,
            class_index: train.class_index().clone(),
        })
    }

    fn save(&self, trained: &Retrained) -> anyhow::Result<PathBuf> {
        let archived = retrained_model_path(&self.settings.model_path, Local::now());
        trained.classifier.save(&archived)?;
        trained.classifier.save(&self.settings.model_path)?;
        trained
            .class_index
            .save(&self.settings.class_indices_path)
            .context("writing class index")?;
        info!(archived = %archived.display(), "Retrained model saved");
        Ok(archived)
    }

    fn reload(&self) -> anyhow::Result<()> {
        self.services.reload()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retrained_model_path() {
        let at = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            retrained_model_path(Path::new("models/image_classifier.mpk"), at),
            PathBuf::from("models/image_classifier_retrained_20250309_140507.mpk")
        );
        assert_eq!(
            retrained_model_path(Path::new("clf"), at),
            PathBuf::from("clf_retrained_20250309_140507.mpk")
        );
    }
}
