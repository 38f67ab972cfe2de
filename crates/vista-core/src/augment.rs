use image::{Rgb, RgbImage};
use rand::Rng;

/// Random geometric augmentation applied to training images only.
///
/// Each image gets one affine transform (rotation, shift, shear, zoom)
/// followed by an optional horizontal flip. Pixels mapped from outside the
/// source are filled with the nearest edge pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmentation {
    /// Max rotation either way, degrees
    pub rotation_degrees: f32,
    /// Max horizontal shift as a fraction of width
    pub width_shift: f32,
    /// Max vertical shift as a fraction of height
    pub height_shift: f32,
    pub horizontal_flip: bool,
    /// Zoom factor drawn from `[1 - zoom, 1 + zoom]` per axis
    pub zoom: f32,
    /// Max shear angle either way, degrees
    pub shear_degrees: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            horizontal_flip: true,
            zoom: 0.2,
            shear_degrees: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transform {
    theta: f32,
    shear: f32,
    zoom_x: f32,
    zoom_y: f32,
    shift_x: f32,
    shift_y: f32,
    flip: bool,
}

impl Augmentation {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, width: u32, height: u32) -> Transform {
        Transform {
            theta: symmetric(rng, self.rotation_degrees).to_radians(),
            shear: symmetric(rng, self.shear_degrees).to_radians(),
            zoom_x: 1.0 + symmetric(rng, self.zoom),
            zoom_y: 1.0 + symmetric(rng, self.zoom),
            shift_x: symmetric(rng, self.width_shift) * width as f32,
            shift_y: symmetric(rng, self.height_shift) * height as f32,
            flip: self.horizontal_flip && rng.gen_bool(0.5),
        }
    }

    /// Produce an augmented copy of `img` with the same dimensions.
    pub fn apply<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return img.clone();
        }
        let t = self.sample(rng, width, height);

        // Output -> source mapping: rotation * shear * zoom around the center, then shift
        let (sin_t, cos_t) = t.theta.sin_cos();
        let (sin_s, cos_s) = t.shear.sin_cos();
        let m00 = cos_t * t.zoom_x;
        let m01 = (cos_t * -sin_s - sin_t * cos_s) * t.zoom_y;
        let m10 = sin_t * t.zoom_x;
        let m11 = (sin_t * -sin_s + cos_t * cos_s) * t.zoom_y;

        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;

        let mut out = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let ox = if t.flip { width - 1 - x } else { x };
                let dx = ox as f32 - cx;
                let dy = y as f32 - cy;
                let sx = m00 * dx + m01 * dy + cx + t.shift_x;
                let sy = m10 * dx + m11 * dy + cy + t.shift_y;
                out.put_pixel(x, y, bilinear_clamped(img, sx, sy));
            }
        }
        out
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range <= 0.0 {
        0.0
    } else {
        rng.gen_range(-range..=range)
    }
}

fn bilinear_clamped(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut px = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        px[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(px)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{shaded_sample, solid_square};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_preserves_dimensions() {
        let img = shaded_sample(0, [200, 40, 40], 33);
        let mut rng = StdRng::seed_from_u64(1);
        let out = Augmentation::default().apply(&img, &mut rng);
        assert_eq!(out.dimensions(), (33, 33));
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        // Nearest fill means no foreign color can leak in from outside the frame
        let img = solid_square([12, 34, 56], 16);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5 {
            let out = Augmentation::default().apply(&img, &mut rng);
            assert!(out.pixels().all(|p| *p == Rgb([12, 34, 56])));
        }
    }

    #[test]
    fn test_identity_when_disabled() {
        let img = shaded_sample(2, [40, 200, 40], 20);
        let none = Augmentation {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            horizontal_flip: false,
            zoom: 0.0,
            shear_degrees: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(none.apply(&img, &mut rng), img);
    }

    #[test]
    fn test_same_seed_same_output() {
        let img = shaded_sample(1, [40, 40, 200], 20);
        let a = Augmentation::default().apply(&img, &mut StdRng::seed_from_u64(99));
        let b = Augmentation::default().apply(&img, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }
}
