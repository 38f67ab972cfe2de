use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use vista_core::validate_upload;

pub const DEFAULT_CLASS_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid file name: {0:?}")]
    InvalidFilename(String),

    #[error("Invalid class label: {0:?}")]
    InvalidClassLabel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reduce a client supplied name to a safe single path component.
///
/// Directories are dropped, whitespace becomes `_` and only ASCII letters,
/// digits, `.`, `-` and `_` survive. May return an empty string.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// A file received from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadSummary {
    pub class_label: String,
    pub uploaded: usize,
    pub rejected: Vec<String>,
}

/// Where uploaded images end up on disk.
#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
    train_dir: PathBuf,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>, train_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            train_dir: train_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn train_dir(&self) -> &Path {
        &self.train_dir
    }

    /// Keep a copy of an image that was sent for prediction.
    pub fn store_prediction_upload(&self, file: &UploadedFile) -> Result<PathBuf, UploadError> {
        let name = secure_filename(&file.filename);
        if name.is_empty() {
            return Err(UploadError::InvalidFilename(file.filename.clone()));
        }
        fs::create_dir_all(&self.upload_dir)?;
        let path = self.upload_dir.join(name);
        fs::write(&path, &file.bytes)?;
        debug!(path = %path.display(), "Stored prediction upload");
        Ok(path)
    }

    /// Add images to the training folder of `class_label`.
    ///
    /// Files with a disallowed extension or content that does not decode are
    /// skipped and listed in the summary.
    pub fn store_training_images(
        &self,
        class_label: &str,
        files: &[UploadedFile],
    ) -> Result<UploadSummary, UploadError> {
        let label = secure_filename(class_label);
        if label.is_empty() {
            return Err(UploadError::InvalidClassLabel(class_label.to_string()));
        }
        let class_dir = self.train_dir.join(&label);

        let mut summary = UploadSummary {
            class_label: label,
            ..Default::default()
        };
        for file in files {
            let name = secure_filename(&file.filename);
            if name.is_empty() {
                summary.rejected.push(file.filename.clone());
                continue;
            }
            if let Err(e) = validate_upload(&name, &file.bytes) {
                warn!(file = %file.filename, "Rejected training upload: {e}");
                summary.rejected.push(file.filename.clone());
                continue;
            }
            fs::create_dir_all(&class_dir)?;
            fs::write(class_dir.join(&name), &file.bytes)?;
            summary.uploaded += 1;
        }

        info!(
            class = %summary.class_label,
            uploaded = summary.uploaded,
            rejected = summary.rejected.len(),
            "Training images uploaded"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use vista_core::synthetic::{encode_png, solid_square};

    fn png(name: &str) -> UploadedFile {
        UploadedFile {
            filename: name.into(),
            bytes: encode_png(&DynamicImage::ImageRgb8(solid_square([255, 0, 0], 50))).unwrap(),
        }
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool leaf.png"), "My_cool_leaf.png");
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\photo.JPG"), "photo.JPG");
        assert_eq!(secure_filename("..."), "");
        assert_eq!(secure_filename("feuille-été.png"), "feuille-t.png");
    }

    #[test]
    fn test_store_training_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploaded"), dir.path().join("train"));

        let files = vec![
            png("red.png"),
            UploadedFile {
                filename: "notes.txt".into(),
                bytes: b"hello".to_vec(),
            },
            UploadedFile {
                filename: "fake.png".into(),
                bytes: b"not really".to_vec(),
            },
        ];
        let summary = store.store_training_images("healthy", &files).unwrap();
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.rejected, ["notes.txt", "fake.png"]);

        let stored: Vec<_> = fs::read_dir(dir.path().join("train/healthy"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(stored, ["red.png"]);
    }

    #[test]
    fn test_class_label_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploaded"), dir.path().join("train"));

        let summary = store.store_training_images("../evil", &[png("a.png")]).unwrap();
        assert_eq!(summary.class_label, "evil");
        assert!(dir.path().join("train/evil/a.png").exists());

        assert!(matches!(
            store.store_training_images("..", &[png("a.png")]),
            Err(UploadError::InvalidClassLabel(_))
        ));
    }

    #[test]
    fn test_store_prediction_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploaded"), dir.path().join("train"));

        let path = store.store_prediction_upload(&png("sub/leaf one.png")).unwrap();
        assert_eq!(path, dir.path().join("uploaded/leaf_one.png"));
        assert!(path.exists());
    }
}
