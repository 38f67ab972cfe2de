//! Synthetic images for smoke runs and tests.
//!
//! `vista scaffold --samples N` uses these to fill class folders so the whole
//! train / predict / retrain loop can run without a real dataset.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::{PreprocessError, Result};

/// Uniform square of a single color
pub fn solid_square(color: [u8; 3], side: u32) -> RgbImage {
    RgbImage::from_pixel(side, side, Rgb(color))
}

/// Pick a base color from words in a class label (placeholder palette)
pub fn color_for_label(label: &str) -> [u8; 3] {
    let label = label.to_lowercase();

    if label.contains("red") || label.contains("diseased") {
        [200, 60, 40]
    } else if label.contains("blue") {
        [60, 80, 220]
    } else if label.contains("green") || label.contains("healthy") {
        [60, 190, 70]
    } else if label.contains("yellow") {
        [230, 220, 70]
    } else {
        // Spread unknown labels over the hue wheel so classes stay separable
        let hash = label
            .bytes()
            .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        [(hash & 0xff) as u8, ((hash >> 8) & 0xff) as u8, ((hash >> 16) & 0xff) as u8]
    }
}

/// A shaded disc on a dark gradient, rotated a little per `variant`
pub fn shaded_sample(variant: usize, base_color: [u8; 3], side: u32) -> RgbImage {
    let mut img = RgbImage::new(side, side);

    let center = side as f32 / 2.0;
    let radius = side as f32 * 0.3;
    let angle = variant as f32 * 0.7;

    for y in 0..side {
        for x in 0..side {
            let dx = x as f32 - center;
            let dy = y as f32 - center;

            let rx = dx * angle.cos() - dy * angle.sin();
            let ry = dx * angle.sin() + dy * angle.cos();
            let dist = (rx * rx + ry * ry).sqrt();

            let pixel = if dist < radius {
                let depth = (1.0 - (dist / radius).powi(2)).sqrt();
                let light = (rx + ry) / (4.0 * radius) + 0.85;
                let brightness = ((depth * 0.7 + 0.3) * light).clamp(0.0, 1.0);
                Rgb([
                    (base_color[0] as f32 * brightness) as u8,
                    (base_color[1] as f32 * brightness) as u8,
                    (base_color[2] as f32 * brightness) as u8,
                ])
            } else {
                let bg = 0.2 + (y as f32 / side as f32) * 0.1;
                Rgb([(50.0 * bg) as u8, (50.0 * bg) as u8, (60.0 * bg) as u8])
            };
            img.put_pixel(x, y, pixel);
        }
    }

    img
}

/// `count` samples for one class label
pub fn samples_for_label(label: &str, count: usize, side: u32) -> Vec<RgbImage> {
    let color = color_for_label(label);
    (0..count).map(|i| shaded_sample(i, color, side)).collect()
}

/// PNG bytes of an image, as a browser upload would carry them
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| PreprocessError::invalid_image("synthetic.png", e))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_samples() {
        let images = samples_for_label("healthy", 4, 24);
        assert_eq!(images.len(), 4);
        assert_eq!(images[0].dimensions(), (24, 24));
        assert_ne!(images[0], images[1]);
    }

    #[test]
    fn test_color_extraction() {
        let red = color_for_label("diseased_leaf");
        assert!(red[0] > red[1] && red[0] > red[2]);

        let green = color_for_label("Healthy");
        assert!(green[1] > green[0] && green[1] > green[2]);

        assert_eq!(color_for_label("cats"), color_for_label("cats"));
        assert_ne!(color_for_label("cats"), color_for_label("dogs"));
    }

    #[test]
    fn test_png_encoding_decodes() {
        let png = encode_png(&DynamicImage::ImageRgb8(solid_square([1, 2, 3], 5))).unwrap();
        let back = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(back.get_pixel(4, 4), &Rgb([1, 2, 3]));
    }
}
