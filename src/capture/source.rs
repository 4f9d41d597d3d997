//! Frame sources
//!
//! A source yields decoded frames from a URI. Sources are opened inside the
//! capture worker and dropped there, which releases the underlying handle.
//!
//! Supported URIs:
//! - `stub://WIDTHxHEIGHT` synthetic frames containing one plate-shaped blob
//! - a local directory, cycling through the images it contains
//! - a local image file, repeated
//! - anything else (rtsp://, http://, video files) via FFmpeg when the
//!   `ffmpeg` feature is enabled

use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::frame::Frame;

/// Errors raised by frame sources.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// The source could not be opened; fatal to the scheduler
    #[error("source '{uri}' unavailable: {reason}")]
    SourceUnavailable { uri: String, reason: String },
    /// A single frame could not be read; the scheduler retries
    #[error("frame read failed: {0}")]
    FrameRead(String),
    /// No backend handles this URI in the current build
    #[error("unsupported source '{0}'")]
    UnsupportedSource(String),
}

impl CaptureError {
    /// Whether the scheduler may retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::FrameRead(_))
    }
}

/// A producer of frames at some native rate.
///
/// Sources are opened on the capture worker and never leave it, so they need
/// not be `Send`.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Opens a [`FrameSource`] for a URI.
pub trait SourceOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Opener that dispatches on the URI shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(CaptureError::SourceUnavailable {
                uri: uri.to_string(),
                reason: "empty source URI".to_string(),
            });
        }

        if let Some(spec) = uri.strip_prefix("stub://") {
            let (width, height) = parse_dimensions(spec).ok_or_else(|| {
                CaptureError::SourceUnavailable {
                    uri: uri.to_string(),
                    reason: "expected stub://WIDTHxHEIGHT".to_string(),
                }
            })?;
            return Ok(Box::new(SyntheticSource::new(width, height)));
        }

        if !uri.contains("://") {
            let path = Path::new(uri);
            if path.exists() {
                return Ok(Box::new(ImageSequenceSource::open(path)?));
            }
        }

        open_stream(uri)
    }
}

#[cfg(feature = "ffmpeg")]
fn open_stream(uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(super::ffmpeg::FfmpegSource::open(uri)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_stream(uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::UnsupportedSource(format!(
        "{} (stream decoding requires the ffmpeg feature)",
        uri
    )))
}

fn parse_dimensions(spec: &str) -> Option<(u32, u32)> {
    if spec.is_empty() {
        return Some((640, 480));
    }
    let (w, h) = spec.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    (width >= 16 && height >= 16).then_some((width, height))
}

/// Generates dark frames with a single bright, plate-proportioned rectangle.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        info!("SyntheticSource: {}x{}", width, height);
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    fn render(&self) -> GrayImage {
        let plate_w = self.width / 4;
        let plate_h = (plate_w / 4).max(2);
        // Drift horizontally so consecutive frames differ
        let drift = (self.frame_count % 8) as u32 * 2;
        let x0 = ((self.width - plate_w) / 2 + drift).min(self.width - plate_w);
        let y0 = self.height.saturating_sub(plate_h) * 2 / 3;

        GrayImage::from_fn(self.width, self.height, |x, y| {
            let inside = x >= x0 && x < x0 + plate_w && y >= y0 && y < y0 + plate_h;
            Luma([if inside { 220 } else { 40 }])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frame_count += 1;
        Ok(Frame::from_gray(self.render()))
    }

    fn describe(&self) -> String {
        format!("stub://{}x{}", self.width, self.height)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Cycles through image files, one per read.
pub struct ImageSequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    /// Open a directory of images or a single image file
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let unavailable = |reason: String| CaptureError::SourceUnavailable {
            uri: path.display().to_string(),
            reason,
        };

        let files = if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| unavailable(e.to_string()))?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            files.sort();
            files
        } else if is_image_file(path) {
            vec![path.to_path_buf()]
        } else {
            return Err(unavailable("not an image file or directory".to_string()));
        };

        if files.is_empty() {
            return Err(unavailable("no image files found".to_string()));
        }

        info!("ImageSequenceSource: {} image(s) from {:?}", files.len(), path);
        Ok(Self {
            root: path.to_path_buf(),
            files,
            next: 0,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let image = image::open(path)
            .map_err(|e| CaptureError::FrameRead(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded frame from {:?}", path);
        Ok(Frame::from_rgb(image.to_rgb8()))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
