//! Directory-per-class datasets.
//!
//! A dataset root holds one sub-directory per class; each image file inside
//! is a sample of that class. Class indices follow the alphabetical order of
//! the sub-directory names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::augment::Augmentation;
use crate::class_index::ClassIndex;
use crate::error::{PreprocessError, Result};
use crate::extension::is_allowed;
use crate::preprocess::{ImageSize, ImageTensor, Preprocessor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// One batch of normalized images with their class indices.
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    pub images: ImageTensor,
    pub labels: Vec<usize>,
}

impl LabeledBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Class folders found under a dataset root, in index order.
#[derive(Debug, Clone)]
pub struct ClassFolder {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// List class sub-directories (sorted by name) and their image files (sorted by name).
///
/// Files whose extension is not an accepted image type are ignored. Empty
/// class folders still get an index.
pub fn scan_classes(dir: &Path) -> Result<Vec<ClassFolder>> {
    let mut classes = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "Skipping class folder with non UTF-8 name");
            continue;
        };

        let mut files = Vec::new();
        for file in fs::read_dir(entry.path())? {
            let file = file?;
            if file.file_type()?.is_file() && is_allowed(file.file_name()) {
                files.push(file.path());
            }
        }
        files.sort();
        classes.push(ClassFolder { name, files });
    }

    classes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(classes)
}

/// Lazily batched samples of a dataset directory.
///
/// Each call to [`DirectoryIterator::iter_epoch`] starts a fresh pass. Images
/// are decoded batch by batch; files that fail to decode are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryIterator {
    samples: Vec<Sample>,
    class_index: ClassIndex,
    preprocessor: Preprocessor,
    batch_size: usize,
    augmentation: Option<Augmentation>,
    shuffle: bool,
    seed: u64,
}

impl DirectoryIterator {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Batches per epoch
    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn class_index(&self) -> &ClassIndex {
        &self.class_index
    }

    pub fn num_classes(&self) -> usize {
        self.class_index.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> ImageSize {
        self.preprocessor.size()
    }

    pub fn is_augmented(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Samples per class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Balanced loss weights: `total / (num_classes * count)` per class.
    ///
    /// Classes without samples get a weight of 1.
    pub fn class_weights(&self) -> Vec<f32> {
        let total = self.samples.len() as f32;
        let num_classes = self.num_classes() as f32;
        self.class_counts()
            .into_iter()
            .map(|count| {
                if count == 0 {
                    1.0
                } else {
                    total / (num_classes * count as f32)
                }
            })
            .collect()
    }

    /// Batches of one pass over the data. Shuffling and augmentation draw
    /// from a generator seeded with `seed + epoch`.
    pub fn iter_epoch(&self, epoch: usize) -> EpochBatches<'_> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rng);
        }
        EpochBatches {
            source: self,
            order,
            cursor: 0,
            rng,
        }
    }
}

pub struct EpochBatches<'a> {
    source: &'a DirectoryIterator,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl Iterator for EpochBatches<'_> {
    type Item = LabeledBatch;

    fn next(&mut self) -> Option<LabeledBatch> {
        let source = self.source;

        while self.cursor < self.order.len() {
            let end = (self.cursor + source.batch_size).min(self.order.len());
            let picked = &self.order[self.cursor..end];
            self.cursor = end;

            let mut images = Vec::with_capacity(picked.len());
            let mut labels = Vec::with_capacity(picked.len());
            for &idx in picked {
                let sample = &source.samples[idx];
                match source.preprocessor.load_rgb(&sample.path) {
                    Ok(img) => {
                        let img = match &source.augmentation {
                            Some(aug) => aug.apply(&img, &mut self.rng),
                            None => img,
                        };
                        images.push(img);
                        labels.push(sample.label);
                    }
                    Err(e) => warn!(path = %sample.path.display(), error = %e, "Skipping image"),
                }
            }

            if !images.is_empty() {
                return Some(LabeledBatch {
                    images: ImageTensor::from_images(&images, source.image_size()),
                    labels,
                });
            }
        }
        None
    }
}

fn class_index_of(classes: &[ClassFolder]) -> Result<ClassIndex> {
    ClassIndex::from_names(classes.iter().map(|c| c.name.clone()))
}

fn ensure_images(dir: &Path, classes: &[ClassFolder]) -> Result<()> {
    if classes.iter().all(|c| c.files.is_empty()) {
        return Err(PreprocessError::EmptyDataset(dir.to_path_buf()));
    }
    Ok(())
}

/// Training and validation iterators over one directory.
///
/// The split is deterministic: within each class, files sorted by name, the
/// first `floor(n * validation_split)` go to validation. Only the training
/// branch is shuffled and augmented.
pub fn build_train_iterators(
    dir: &Path,
    image_size: ImageSize,
    batch_size: usize,
    validation_split: f32,
    seed: u64,
) -> Result<(DirectoryIterator, DirectoryIterator)> {
    let classes = scan_classes(dir)?;
    ensure_images(dir, &classes)?;
    let class_index = class_index_of(&classes)?;
    let split = validation_split.clamp(0.0, 1.0);

    let mut train = Vec::new();
    let mut val = Vec::new();
    for (label, class) in classes.iter().enumerate() {
        let held_out = (class.files.len() as f32 * split).floor() as usize;
        for (i, path) in class.files.iter().enumerate() {
            let sample = Sample {
                path: path.clone(),
                label,
            };
            if i < held_out {
                val.push(sample);
            } else {
                train.push(sample);
            }
        }
        debug!(class = %class.name, total = class.files.len(), held_out, "Split class folder");
    }

    info!(
        dir = %dir.display(),
        classes = class_index.len(),
        train = train.len(),
        validation = val.len(),
        "Built training iterators"
    );

    let preprocessor = Preprocessor::new(image_size);
    let batch_size = batch_size.max(1);
    let train_iter = DirectoryIterator {
        samples: train,
        class_index: class_index.clone(),
        preprocessor: preprocessor.clone(),
        batch_size,
        augmentation: Some(Augmentation::default()),
        shuffle: true,
        seed,
    };
    let val_iter = DirectoryIterator {
        samples: val,
        class_index,
        preprocessor,
        batch_size,
        augmentation: None,
        shuffle: false,
        seed,
    };
    Ok((train_iter, val_iter))
}

/// All images of a directory in file order, without augmentation.
pub fn build_test_iterator(
    dir: &Path,
    image_size: ImageSize,
    batch_size: usize,
) -> Result<DirectoryIterator> {
    let classes = scan_classes(dir)?;
    ensure_images(dir, &classes)?;
    let class_index = class_index_of(&classes)?;

    let samples = classes
        .iter()
        .enumerate()
        .flat_map(|(label, class)| {
            class.files.iter().map(move |path| Sample {
                path: path.clone(),
                label,
            })
        })
        .collect();

    Ok(DirectoryIterator {
        samples,
        class_index,
        preprocessor: Preprocessor::new(image_size),
        batch_size: batch_size.max(1),
        augmentation: None,
        shuffle: false,
        seed: 0,
    })
}

/// Balanced class weights for every class folder of `dir`, by class index.
pub fn class_weights(dir: &Path) -> Result<Vec<f32>> {
    let classes = scan_classes(dir)?;
    let total: usize = classes.iter().map(|c| c.files.len()).sum();
    let num_classes = classes.len() as f32;
    Ok(classes
        .iter()
        .map(|c| {
            if c.files.is_empty() {
                1.0
            } else {
                total as f32 / (num_classes * c.files.len() as f32)
            }
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStatistics {
    pub classes: BTreeMap<String, usize>,
    pub total_images: usize,
}

/// Image counts per class folder. A missing directory yields empty statistics.
pub fn dataset_statistics(dir: &Path) -> Result<DatasetStatistics> {
    if !dir.is_dir() {
        return Ok(DatasetStatistics::default());
    }

    let mut stats = DatasetStatistics::default();
    for class in scan_classes(dir)? {
        stats.total_images += class.files.len();
        stats.classes.insert(class.name, class.files.len());
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::samples_for_label;

    fn write_class(root: &Path, label: &str, count: usize) {
        let dir = root.join(label);
        fs::create_dir_all(&dir).unwrap();
        for (i, img) in samples_for_label(label, count, 12).into_iter().enumerate() {
            img.save(dir.join(format!("{label}_{i:02}.png"))).unwrap();
        }
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "zebra", 2);
        write_class(dir.path(), "apple", 1);
        fs::write(dir.path().join("apple/readme.txt"), "skip me").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let classes = scan_classes(dir.path()).unwrap();
        let names: Vec<_> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["apple", "empty", "zebra"]);
        assert_eq!(classes[0].files.len(), 1);
        assert!(classes[1].files.is_empty());
    }

    #[test]
    fn test_split_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "healthy", 10);
        write_class(dir.path(), "diseased", 5);

        let size = ImageSize::square(8);
        let (train, val) = build_train_iterators(dir.path(), size, 4, 0.2, 1).unwrap();
        assert_eq!(val.len(), 2 + 1);
        assert_eq!(train.len(), 8 + 4);
        assert_eq!(train.class_index().name(0), Some("diseased"));
        assert!(train.is_augmented());
        assert!(!val.is_augmented());

        let (train2, val2) = build_train_iterators(dir.path(), size, 4, 0.2, 99).unwrap();
        assert_eq!(val.samples(), val2.samples());
        assert_eq!(train.samples(), train2.samples());

        // First files of each class are held out
        assert!(val.samples()[0].path.ends_with("diseased/diseased_00.png"));
    }

    #[test]
    fn test_epoch_batches() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "a", 3);
        write_class(dir.path(), "b", 4);

        let size = ImageSize::square(6);
        let (train, _) = build_train_iterators(dir.path(), size, 3, 0.0, 5).unwrap();
        assert_eq!(train.num_batches(), 3);

        let batches: Vec<_> = train.iter_epoch(0).collect();
        assert_eq!(batches.iter().map(LabeledBatch::len).collect::<Vec<_>>(), [3, 3, 1]);
        assert_eq!(batches[0].images.shape(), [3, 3, 6, 6]);

        // Restartable with identical order for the same epoch
        let first: Vec<_> = train.iter_epoch(0).flat_map(|b| b.labels).collect();
        let again: Vec<_> = train.iter_epoch(0).flat_map(|b| b.labels).collect();
        assert_eq!(first, again);
        assert_eq!(first.len(), 7);
    }

    #[test]
    fn test_broken_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "a", 2);
        fs::write(dir.path().join("a/zz_broken.png"), b"nope").unwrap();

        let test = build_test_iterator(dir.path(), ImageSize::square(4), 8).unwrap();
        assert_eq!(test.len(), 3);
        let batches: Vec<_> = test.iter_epoch(0).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].labels, [0, 0]);
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("only_folder")).unwrap();
        let err = build_test_iterator(dir.path(), ImageSize::square(4), 2).unwrap_err();
        assert!(matches!(err, PreprocessError::EmptyDataset(_)));
    }

    #[test]
    fn test_statistics_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "healthy", 6);
        write_class(dir.path(), "diseased", 2);

        let stats = dataset_statistics(dir.path()).unwrap();
        assert_eq!(stats.total_images, 8);
        assert_eq!(stats.classes["healthy"], 6);

        let weights = class_weights(dir.path()).unwrap();
        assert_eq!(weights, [2.0, 8.0 / 12.0]);

        let missing = dataset_statistics(&dir.path().join("nope")).unwrap();
        assert_eq!(missing, DatasetStatistics::default());
    }
}
