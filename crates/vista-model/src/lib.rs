pub mod backend;
pub mod callbacks;
pub mod classifier;
pub mod error;
pub mod history;
pub mod metadata;
pub mod network;
pub mod store;
pub mod trainer;

pub use classifier::{DEFAULT_LEARNING_RATE, ImageClassifier, Prediction};
pub use error::ModelError;
pub use history::{EpochMetrics, Evaluation, TrainingHistory};
pub use metadata::{ModelMetadata, metadata_path};
pub use store::model_file;
