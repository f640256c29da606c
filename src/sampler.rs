use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

use crate::device::VideoFeed;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("video feed is not active")]
    Inactive,
    #[error("video has not decoded a frame yet")]
    NotReady,
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// One encoded still. Produced fresh per tick and never cached.
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    jpeg_quality: u8,
}

impl FrameSampler {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn capture(&self, feed: &VideoFeed) -> Result<FramePayload, CaptureError> {
        if !feed.is_active() {
            return Err(CaptureError::Inactive);
        }

        let (width, height) = feed.dimensions();
        if width == 0 || height == 0 {
            return Err(CaptureError::NotReady);
        }

        let frame = feed.latest_frame().ok_or(CaptureError::NotReady)?;
        let (width, height) = frame.dimensions();

        let mut jpeg = Vec::with_capacity(jpeg_capacity(width, height));
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality)
            .encode_image(&frame)
            .map_err(|err| CaptureError::Encode(err.to_string()))?;

        Ok(FramePayload {
            jpeg,
            width,
            height,
            captured_at: Utc::now(),
        })
    }
}

/// Rough output size guess: a quarter byte per pixel.
fn jpeg_capacity(width: u32, height: u32) -> usize {
    width as usize * height as usize / 4
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}
