use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared by every layer of the pipeline.
///
/// Each crate keeps its own error enum; this is the stable, serializable
/// name of the failure that ends up in prediction records and HTTP bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidImage,
    InvalidFileType,
    ModelFileNotFound,
    ModelLoad,
    ServiceInit,
    NotInitialized,
    Training,
    Internal,
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Error preprocessing image {source_name}: {reason}")]
    InvalidImage { source_name: String, reason: String },

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("No valid images found in the batch")]
    NoValidImages,

    #[error("No class directories with images found in {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("Malformed class index: {0}")]
    ClassIndex(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PreprocessError {
    pub fn invalid_image(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidImage {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidImage { .. } | Self::NoValidImages => ErrorKind::InvalidImage,
            Self::InvalidFileType(_) => ErrorKind::InvalidFileType,
            Self::EmptyDataset(_) => ErrorKind::Training,
            Self::ClassIndex(_) | Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PreprocessError>;
