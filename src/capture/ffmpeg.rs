//! FFmpeg-backed stream source (feature `ffmpeg`).
//!
//! Decodes network streams and video files to RGB24. Frames whose
//! presentation time has already fallen behind the wall clock are decoded but
//! not converted, so a slow consumer always receives a recent frame.

use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::frame::Frame;
use super::source::{CaptureError, FrameSource};

pub struct FfmpegSource {
    uri: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    started_at: Instant,
    first_pts: Option<i64>,
    frames_decoded: u64,
    frames_skipped: u64,
}

impl FfmpegSource {
    pub fn open(uri: &str) -> Result<Self, CaptureError> {
        let unavailable = |reason: String| CaptureError::SourceUnavailable {
            uri: uri.to_string(),
            reason,
        };

        ffmpeg::init().map_err(|e| unavailable(format!("initialize ffmpeg: {}", e)))?;
        let input = ffmpeg::format::input(&uri).map_err(|e| unavailable(e.to_string()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| unavailable("no video stream".to_string()))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| unavailable(format!("decoder parameters: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| unavailable(format!("open video decoder: {}", e)))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| unavailable(format!("create scaler: {}", e)))?;

        info!(
            "FfmpegSource: opened {} ({}x{})",
            uri,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            uri: uri.to_string(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            started_at: Instant::now(),
            first_pts: None,
            frames_decoded: 0,
            frames_skipped: 0,
        })
    }
}

/// Whether a decoded frame is already older than the wall clock allows
fn is_stale(
    first_pts: &mut Option<i64>,
    started_at: Instant,
    time_base: f64,
    pts: Option<i64>,
) -> bool {
    let Some(pts) = pts else {
        return false;
    };
    let first = *first_pts.get_or_insert(pts);
    let media_offset = Duration::from_secs_f64(((pts - first) as f64 * time_base).max(0.0));
    // One frame of slack at 25 fps
    started_at.elapsed() > media_offset + Duration::from_millis(40)
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        let mut pending: Option<ffmpeg::frame::Video> = None;
        let mut fresh = false;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            self.decoder
                .send_packet(&packet)
                .map_err(|e| CaptureError::FrameRead(format!("send packet: {}", e)))?;

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                self.frames_decoded += 1;
                let stale = is_stale(
                    &mut self.first_pts,
                    self.started_at,
                    self.time_base,
                    decoded.pts(),
                );
                let frame = std::mem::replace(&mut decoded, ffmpeg::frame::Video::empty());
                if pending.replace(frame).is_some() {
                    self.frames_skipped += 1;
                }
                if !stale {
                    fresh = true;
                    break;
                }
            }

            if fresh {
                break;
            }
        }

        // End of stream still hands out the newest stale frame
        let latest = pending
            .ok_or_else(|| CaptureError::FrameRead("stream ended without frames".to_string()))?;
        self.scaler
            .run(&latest, &mut rgb_frame)
            .map_err(|e| CaptureError::FrameRead(format!("scale frame: {}", e)))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        if self.frames_skipped > 0 && self.frames_decoded % 250 == 0 {
            debug!(
                "FfmpegSource: {} decoded, {} stale frames skipped",
                self.frames_decoded, self.frames_skipped
            );
        }
        Frame::new(pixels, width, height, 3)
            .ok_or_else(|| CaptureError::FrameRead("frame geometry mismatch".to_string()))
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), CaptureError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .ok_or_else(|| CaptureError::FrameRead("frame buffer too short".to_string()))?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        let slice = data
            .get(start..end)
            .ok_or_else(|| CaptureError::FrameRead("frame row out of bounds".to_string()))?;
        pixels.extend_from_slice(slice);
    }

    Ok((pixels, width, height))
}
