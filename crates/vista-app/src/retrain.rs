pub mod outcome;
pub mod status;
pub mod steps;
pub mod worker;

pub use outcome::{RetrainHandle, RetrainOutcome};
pub use status::{RetrainStage, RetrainingStatus};
pub use steps::{ClassifierRetrain, RetrainSettings, RetrainSteps, retrained_model_path};
pub use worker::{RetrainError, RetrainJob, Retrainer};
