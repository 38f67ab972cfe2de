use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::info;
use vista_core::{ClassIndex, ErrorKind, ImageSize, ImageTensor, PreprocessError, Preprocessor};
use vista_model::{DEFAULT_LEARNING_RATE, ImageClassifier, ModelError};

use crate::prediction::record::{
    Classification, ImageOrigin, PredictionFailure, PredictionRecord, Record, ThresholdRecord,
    Thresholded, TopK, TopKRecord,
};

/// An image to classify, from disk or from an upload held in memory.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Upload { filename: String, bytes: Vec<u8> },
}

impl ImageSource {
    pub fn origin(&self) -> ImageOrigin {
        match self {
            Self::Path(path) => ImageOrigin::ImagePath(path.clone()),
            Self::Upload { filename, .. } => ImageOrigin::Filename(filename.clone()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceInitError {
    #[error("Cannot load class index {}: {source}", .path.display())]
    ClassIndex {
        path: PathBuf,
        source: PreprocessError,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Model has {model} outputs but the class index names {classes} classes")]
    ClassCountMismatch { model: usize, classes: usize },
}

impl ServiceInitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Model(ModelError::ModelFileNotFound(_)) => ErrorKind::ModelFileNotFound,
            Self::Model(ModelError::ModelLoad { .. }) => ErrorKind::ModelLoad,
            _ => ErrorKind::ServiceInit,
        }
    }
}

/// Preprocessor, classifier and class names behind one `predict` call.
///
/// Every prediction method returns a record; failures are captured in it.
#[derive(Debug)]
pub struct PredictionService {
    classifier: Mutex<ImageClassifier>,
    class_index: ClassIndex,
    preprocessor: Preprocessor,
    model_path: PathBuf,
}

impl PredictionService {
    /// Load the model and its class index; fail if either is missing, malformed or they disagree.
    pub fn new(model_path: &Path, class_indices_path: &Path) -> Result<Self, ServiceInitError> {
        let class_index =
            ClassIndex::load(class_indices_path).map_err(|source| ServiceInitError::ClassIndex {
                path: class_indices_path.to_path_buf(),
                source,
            })?;

        let mut classifier =
            ImageClassifier::new(ImageSize::default(), class_index.len(), DEFAULT_LEARNING_RATE);
        classifier.load(model_path)?;

        if classifier.num_classes() != class_index.len() {
            return Err(ServiceInitError::ClassCountMismatch {
                model: classifier.num_classes(),
                classes: class_index.len(),
            });
        }

        let preprocessor = Preprocessor::new(classifier.image_size());
        info!(
            model = %model_path.display(),
            classes = ?class_index.names(),
            "Prediction service initialized"
        );

        Ok(Self {
            classifier: Mutex::new(classifier),
            class_index,
            preprocessor,
            model_path: model_path.to_path_buf(),
        })
    }

    pub fn class_index(&self) -> &ClassIndex {
        &self.class_index
    }

    pub fn image_size(&self) -> ImageSize {
        self.preprocessor.size()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn tensor(&self, source: &ImageSource) -> Result<ImageTensor, PreprocessError> {
        match source {
            ImageSource::Path(path) => self.preprocessor.preprocess_path(path),
            ImageSource::Upload { filename, bytes } => {
                self.preprocessor.preprocess_bytes(bytes, filename)
            }
        }
    }

    fn classify(&self, source: &ImageSource) -> Result<Classification, PredictionFailure> {
        let tensor = self.tensor(source)?;
        let prediction = {
            let classifier = self.classifier.lock().unwrap_or_else(PoisonError::into_inner);
            classifier.predict(&tensor)?
        };
        Ok(Classification::from_prediction(&prediction, &self.class_index)?)
    }

    pub fn predict(&self, source: &ImageSource) -> PredictionRecord {
        Record::new(self.classify(source), source.origin())
    }

    /// One record per path, in order.
    pub fn predict_batch<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<PredictionRecord> {
        paths
            .iter()
            .map(|p| self.predict(&ImageSource::Path(p.as_ref().to_path_buf())))
            .collect()
    }

    pub fn top_k(&self, source: &ImageSource, k: usize) -> TopKRecord {
        let outcome = self
            .classify(source)
            .map(|c| TopK::from_classification(&c, k));
        Record::new(outcome, source.origin())
    }

    pub fn with_threshold(&self, source: &ImageSource, threshold: f32) -> ThresholdRecord {
        let outcome = self
            .classify(source)
            .map(|c| Thresholded::new(c, threshold));
        Record::new(outcome, source.origin())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::DynamicImage;
    use vista_core::synthetic::{encode_png, solid_square};

    pub(crate) const SIDE: u32 = 16;

    /// A freshly created (untrained) two-class model with its class index.
    pub(crate) fn write_model(dir: &Path) -> (PathBuf, PathBuf) {
        let model_path = dir.join("image_classifier.mpk");
        let index_path = dir.join("class_indices.json");

        let mut clf = ImageClassifier::new(ImageSize::square(SIDE), 2, 1e-3)
            .with_backbone_channels(vec![4, 8]);
        clf.create().unwrap();
        clf.save(&model_path).unwrap();
        ClassIndex::from_names(["diseased", "healthy"])
            .unwrap()
            .save(&index_path)
            .unwrap();
        (model_path, index_path)
    }

    pub(crate) fn red_png() -> Vec<u8> {
        encode_png(&DynamicImage::ImageRgb8(solid_square([255, 0, 0], 50))).unwrap()
    }

    #[test]
    fn test_predict_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (model, index) = write_model(dir.path());
        let service = PredictionService::new(&model, &index).unwrap();
        assert_eq!(service.image_size(), ImageSize::square(SIDE));

        let record = service.predict(&ImageSource::Upload {
            filename: "leaf.png".into(),
            bytes: red_png(),
        });
        let classification = record.value().unwrap();
        let sum: f32 = classification.probabilities.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        let max = classification
            .probabilities
            .iter()
            .map(|(_, p)| *p)
            .fold(f32::MIN, f32::max);
        assert_eq!(classification.confidence, max);
        assert_eq!(record.origin, ImageOrigin::Filename("leaf.png".into()));
    }

    #[test]
    fn test_failures_become_records() {
        let dir = tempfile::tempdir().unwrap();
        let (model, index) = write_model(dir.path());
        let service = PredictionService::new(&model, &index).unwrap();

        let record = service.predict(&ImageSource::Upload {
            filename: "notes.png".into(),
            bytes: b"plain text".to_vec(),
        });
        let failure = record.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::InvalidImage);

        let missing = dir.path().join("missing.png");
        let records = service.predict_batch(&[missing.clone()]);
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_success());
        assert_eq!(records[0].origin, ImageOrigin::ImagePath(missing));
    }

    #[test]
    fn test_top_k_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (model, index) = write_model(dir.path());
        let service = PredictionService::new(&model, &index).unwrap();
        let source = ImageSource::Upload {
            filename: "leaf.png".into(),
            bytes: red_png(),
        };

        let top = service.top_k(&source, 5);
        let ranked = &top.value().unwrap().top_predictions;
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].probability >= ranked[1].probability);

        let plain = service.predict(&source);
        let annotated = service.with_threshold(&source, 1.1);
        let annotated = annotated.value().unwrap();
        assert!(!annotated.prediction_status.is_confident());
        assert_eq!(
            annotated.classification.predicted_class,
            plain.value().unwrap().predicted_class
        );
    }

    #[test]
    fn test_init_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (model, index) = write_model(dir.path());

        let err = PredictionService::new(&dir.path().join("none.mpk"), &index).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelFileNotFound);

        let err = PredictionService::new(&model, &dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, ServiceInitError::ClassIndex { .. }));

        let three = dir.path().join("three.json");
        ClassIndex::from_names(["a", "b", "c"]).unwrap().save(&three).unwrap();
        let err = PredictionService::new(&model, &three).unwrap_err();
        assert!(matches!(
            err,
            ServiceInitError::ClassCountMismatch { model: 2, classes: 3 }
        ));
    }
}
