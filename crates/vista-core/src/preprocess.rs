//! Image loading and normalization for prediction and training.
//!
//! Every image, whatever its color mode, becomes a three channel RGB image of
//! the model resolution with values scaled from `[0, 255]` to `[0, 1]`.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PreprocessError, Result};
use crate::extension::ImageExtension;

pub const CHANNELS: usize = 3;

/// Interpolation used for every resize, training and serving alike.
pub const RESIZE_FILTER: FilterType = FilterType::Nearest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }

    /// Number of values one image occupies in a tensor
    pub fn values(&self) -> usize {
        CHANNELS * self.pixels()
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::square(128)
    }
}

/// Normalized pixels in channel-first layout `[batch, 3, height, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    batch: usize,
    size: ImageSize,
}

impl ImageTensor {
    /// Stack already resized images. All images must share `size`.
    pub fn from_images(images: &[RgbImage], size: ImageSize) -> Self {
        let mut data = Vec::with_capacity(images.len() * size.values());
        for img in images {
            debug_assert_eq!(img.dimensions(), (size.width, size.height));
            push_channel_first(img, &mut data);
        }
        Self {
            data,
            batch: images.len(),
            size,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [
            self.batch,
            CHANNELS,
            self.size.height as usize,
            self.size.width as usize,
        ]
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Values of the `index`-th image of the batch
    pub fn item(&self, index: usize) -> Option<&[f32]> {
        let len = self.size.values();
        self.data.get(index * len..(index + 1) * len)
    }
}

fn push_channel_first(img: &RgbImage, out: &mut Vec<f32>) {
    for channel in 0..CHANNELS {
        for pixel in img.pixels() {
            out.push(pixel[channel] as f32 / 255.0);
        }
    }
}

/// Resizes and normalizes images to the model resolution.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: ImageSize,
}

impl Preprocessor {
    pub fn new(size: ImageSize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Decode raw bytes into an image, guessing the format from content.
    pub fn decode(&self, bytes: &[u8], source_name: &str) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| PreprocessError::invalid_image(source_name, e))
    }

    /// Open an image file, guessing the format from content rather than extension.
    pub fn open(&self, path: &Path) -> Result<DynamicImage> {
        let name = path.display().to_string();
        ImageReader::open(path)
            .map_err(|e| PreprocessError::invalid_image(&name, e))?
            .with_guessed_format()
            .map_err(|e| PreprocessError::invalid_image(&name, e))?
            .decode()
            .map_err(|e| PreprocessError::invalid_image(&name, e))
    }

    /// Coerce to RGB and resize to the target resolution.
    pub fn resize_rgb(&self, img: &DynamicImage) -> RgbImage {
        let rgb = img.to_rgb8();
        if rgb.dimensions() == (self.size.width, self.size.height) {
            return rgb;
        }
        imageops::resize(&rgb, self.size.width, self.size.height, RESIZE_FILTER)
    }

    /// Load and resize a file to RGB.
    pub fn load_rgb(&self, path: &Path) -> Result<RgbImage> {
        Ok(self.resize_rgb(&self.open(path)?))
    }

    pub fn preprocess_image(&self, img: &DynamicImage) -> ImageTensor {
        ImageTensor::from_images(&[self.resize_rgb(img)], self.size)
    }

    /// Preprocess an uploaded image held in memory.
    pub fn preprocess_bytes(&self, bytes: &[u8], source_name: &str) -> Result<ImageTensor> {
        let img = self.decode(bytes, source_name)?;
        Ok(self.preprocess_image(&img))
    }

    pub fn preprocess_path(&self, path: &Path) -> Result<ImageTensor> {
        let img = self.open(path)?;
        Ok(self.preprocess_image(&img))
    }

    /// Preprocess several files into one batch. Unreadable files are skipped.
    pub fn preprocess_batch<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ImageTensor> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            match self.load_rgb(path) {
                Ok(img) => images.push(img),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping image"),
            }
        }

        if images.is_empty() {
            return Err(PreprocessError::NoValidImages);
        }
        Ok(ImageTensor::from_images(&images, self.size))
    }
}

/// True if the file has an allowed extension and decodes as an image.
pub fn validate_image(path: &Path) -> bool {
    if ImageExtension::from_filename(path).is_none() {
        return false;
    }
    match fs::read(path) {
        Ok(bytes) => image::load_from_memory(&bytes).is_ok(),
        Err(_) => false,
    }
}

/// Check an upload before it is stored: allowed extension, decodable content.
pub fn validate_upload(filename: &str, bytes: &[u8]) -> Result<ImageExtension> {
    let ext = ImageExtension::from_filename(filename).ok_or_else(|| {
        PreprocessError::InvalidFileType(format!(
            "{filename} (allowed: {})",
            ImageExtension::allowed_list()
        ))
    })?;
    image::load_from_memory(bytes).map_err(|e| PreprocessError::invalid_image(filename, e))?;
    Ok(ext)
}
