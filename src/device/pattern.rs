use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use image::{Rgb, RgbImage};

use super::{CameraBackend, DeviceError, MediaStream, MediaTrack, VideoConstraints, VideoSource};

/// Synthetic camera producing a scrolling gradient. Used by the CLI when no
/// hardware is wired in and by integration tests.
pub struct PatternCamera {
    warmup: Duration,
}

impl PatternCamera {
    pub fn new() -> Self {
        Self {
            warmup: Duration::from_millis(100),
        }
    }

    /// Frames report zero dimensions until `warmup` has elapsed, like a real
    /// device before its first decoded frame.
    pub fn with_warmup(warmup: Duration) -> Self {
        Self { warmup }
    }
}

impl Default for PatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for PatternCamera {
    fn open(&self, constraints: &VideoConstraints) -> Result<MediaStream, DeviceError> {
        if constraints.ideal_width == 0 || constraints.ideal_height == 0 {
            return Err(DeviceError::Unavailable(
                "pattern camera needs a non-zero resolution".into(),
            ));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let track = PatternTrack {
            label: format!(
                "pattern {}x{}",
                constraints.ideal_width, constraints.ideal_height
            ),
            stopped: Arc::clone(&stopped),
        };
        let video = PatternVideo {
            width: constraints.ideal_width,
            height: constraints.ideal_height,
            opened_at: Instant::now(),
            warmup: self.warmup,
            stopped,
        };

        Ok(MediaStream {
            tracks: vec![Arc::new(track)],
            video: Arc::new(video),
        })
    }
}

struct PatternTrack {
    label: String,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack for PatternTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct PatternVideo {
    width: u32,
    height: u32,
    opened_at: Instant,
    warmup: Duration,
    stopped: Arc<AtomicBool>,
}

impl PatternVideo {
    fn decoding(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.opened_at.elapsed() >= self.warmup
    }
}

impl VideoSource for PatternVideo {
    fn dimensions(&self) -> (u32, u32) {
        if self.decoding() {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn latest_frame(&self) -> Option<RgbImage> {
        if !self.decoding() {
            return None;
        }
        let (width, height) = (self.width, self.height);
        let shift = ((self.opened_at.elapsed().as_millis() / 16) % width as u128) as u32;
        Some(RgbImage::from_fn(width, height, |x, y| {
            let r = (((x + shift) % width) * 255 / width) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r, g, 128])
        }))
    }
}
