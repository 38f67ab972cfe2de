use std::path::PathBuf;

use thiserror::Error;
use vista_core::{ErrorKind, PreprocessError};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not created or loaded")]
    NotInitialized,

    #[error("Model file not found: {}", .0.display())]
    ModelFileNotFound(PathBuf),

    #[error("Error loading model {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Error saving model {}: {reason}", .path.display())]
    ModelSave { path: PathBuf, reason: String },

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Model produced unreadable output: {0}")]
    Output(String),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn save(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ModelSave {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::ModelFileNotFound(_) => ErrorKind::ModelFileNotFound,
            Self::ModelLoad { .. } => ErrorKind::ModelLoad,
            Self::Training(_) | Self::InvalidConfig(_) => ErrorKind::Training,
            Self::Preprocess(e) => e.kind(),
            Self::ModelSave { .. } | Self::Output(_) | Self::Json(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
