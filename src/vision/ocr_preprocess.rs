//! Image preprocessing for OCR
//!
//! Plate crops are small and unevenly lit. They are converted to grayscale,
//! optionally binarized with an Otsu threshold, and upscaled before being
//! handed to the OCR engine.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Preprocessing settings for OCR input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPreprocessing {
    /// Apply an Otsu binary threshold
    pub binarize: bool,
    /// Integer upscale factor (1 = unchanged)
    pub upscale: u32,
}

impl Default for OcrPreprocessing {
    fn default() -> Self {
        Self {
            binarize: true,
            upscale: 2,
        }
    }
}

/// Convert a region crop to the grayscale image the OCR engine reads
pub fn prepare_region(image: &RgbImage, settings: &OcrPreprocessing) -> GrayImage {
    let mut gray = to_grayscale(image);

    if settings.binarize {
        let level = otsu_level(&gray);
        trace!("Otsu level {} for {}x{} region", level, gray.width(), gray.height());
        apply_threshold(&mut gray, level);
    }

    if settings.upscale > 1 {
        gray = upscale(&gray, settings.upscale);
    }

    gray
}

/// Standard luminance weights, rounded
fn to_grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([gray.round().clamp(0.0, 255.0) as u8])
    })
}

/// Pixels above `level` become white, the rest black
fn apply_threshold(gray: &mut GrayImage, level: u8) {
    for pixel in gray.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
}

fn upscale(gray: &GrayImage, factor: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    imageops::resize(
        gray,
        width.saturating_mul(factor),
        height.saturating_mul(factor),
        FilterType::CatmullRom,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_plain_grayscale_when_disabled() {
        let image = RgbImage::from_pixel(3, 2, Rgb([255, 0, 0]));
        let settings = OcrPreprocessing {
            binarize: false,
            upscale: 1,
        };
        let result = prepare_region(&image, &settings);
        assert_eq!(result.dimensions(), (3, 2));
        // 0.299 * 255 = 76.2
        assert!(result.pixels().all(|p| p[0] == 76));
    }

    #[test]
    fn test_otsu_separates_dark_glyphs_from_plate() {
        let mut image = RgbImage::from_pixel(8, 4, Rgb([200, 200, 200]));
        for y in 1..3 {
            for x in 2..5 {
                image.put_pixel(x, y, Rgb([40, 40, 40]));
            }
        }
        let settings = OcrPreprocessing {
            binarize: true,
            upscale: 1,
        };

        let result = prepare_region(&image, &settings);

        assert_eq!(result.get_pixel(0, 0)[0], 255);
        assert_eq!(result.get_pixel(3, 1)[0], 0);
        assert!(result.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_upscale_doubles_dimensions() {
        let image = RgbImage::from_pixel(30, 10, Rgb([128, 128, 128]));
        let result = prepare_region(&image, &OcrPreprocessing::default());
        assert_eq!(result.dimensions(), (60, 20));
    }

    #[test]
    fn test_uniform_region_stays_uniform() {
        let image = RgbImage::from_pixel(6, 3, Rgb([90, 90, 90]));
        let settings = OcrPreprocessing {
            binarize: false,
            upscale: 3,
        };
        let result = prepare_region(&image, &settings);
        assert_eq!(result.dimensions(), (18, 9));
        assert!(result.pixels().all(|p| (89..=91).contains(&p[0])));
    }
}
