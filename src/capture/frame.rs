//! Frame data structures for captured video content

use image::{GrayImage, Luma, Rgb, RgbImage};
use std::time::SystemTime;

/// A single decoded video frame.
///
/// Pixels are stored row-major, interleaved, with `channels` bytes per pixel:
/// 1 = gray, 3 = RGB, 4 = RGBA. Frames are handed to detection by clone,
/// never by reference into the live capture buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per pixel (1, 3 or 4)
    pub channels: u8,
    /// Wall-clock time when the frame was captured
    pub captured_at: SystemTime,
}

impl Frame {
    /// Create a new frame stamped with the current time.
    ///
    /// Returns `None` when the buffer length does not match the geometry or
    /// the channel count is unsupported.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Option<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return None;
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            channels,
            captured_at: SystemTime::now(),
        })
    }

    /// Wrap an RGB image
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 3,
            captured_at: SystemTime::now(),
        }
    }

    /// Wrap a grayscale image
    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 1,
            captured_at: SystemTime::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        &self.data[idx..idx + c]
    }

    /// Single-channel intensity image.
    ///
    /// Uses the standard luminance weights (0.299 R + 0.587 G + 0.114 B).
    pub fn to_luma(&self) -> GrayImage {
        if self.channels == 1 {
            if let Some(gray) = GrayImage::from_raw(self.width, self.height, self.data.clone()) {
                return gray;
            }
        }
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            Luma([gray.round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Three-channel copy of the frame (alpha dropped, gray replicated)
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            match self.channels {
                1 => Rgb([p[0], p[0], p[0]]),
                _ => Rgb([p[0], p[1], p[2]]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_geometry() {
        assert!(Frame::new(vec![0; 10], 2, 2, 3).is_none());
        assert!(Frame::new(vec![0; 8], 2, 2, 2).is_none());
        assert!(Frame::new(vec![0; 12], 2, 2, 3).is_some());
    }

    #[test]
    fn test_to_luma_weights() {
        // Red, green, blue, white
        let data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = Frame::new(data, 2, 2, 3).unwrap();
        let gray = frame.to_luma();

        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(0, 1).0[0], 29);
        assert_eq!(gray.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn test_gray_frame_roundtrips_to_rgb() {
        let frame = Frame::from_gray(GrayImage::from_pixel(3, 2, Luma([42])));
        let rgb = frame.to_rgb();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(2, 1).0, [42, 42, 42]);
        assert_eq!(frame.to_luma().get_pixel(1, 1).0[0], 42);
    }

    #[test]
    fn test_clone_is_independent() {
        let frame = Frame::from_gray(GrayImage::from_pixel(2, 2, Luma([1])));
        let mut copy = frame.clone();
        copy.data[0] = 9;
        assert_eq!(frame.data[0], 1);
    }
}
