pub mod log;
pub mod record;
pub mod service;

pub use log::{LogError, LogStatistics, PredictionLog, PredictionStatistics};
pub use record::{
    Classification, ImageOrigin, PredictionFailure, PredictionRecord, PredictionStatus, Record,
    ThresholdRecord, TopK, TopKRecord,
};
pub use service::{ImageSource, PredictionService, ServiceInitError};
