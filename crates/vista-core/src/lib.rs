pub mod augment;
pub mod class_index;
pub mod dataset;
pub mod error;
pub mod extension;
pub mod preprocess;
pub mod synthetic;

pub use augment::Augmentation;
pub use class_index::ClassIndex;
pub use dataset::{
    DatasetStatistics, DirectoryIterator, LabeledBatch, build_test_iterator, build_train_iterators,
    class_weights, dataset_statistics,
};
pub use error::{ErrorKind, PreprocessError};
pub use extension::ImageExtension;
pub use preprocess::{ImageSize, ImageTensor, Preprocessor, validate_image, validate_upload};
