//! Controllable camera and transport doubles shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
use tokio::sync::Semaphore;

use crate::analysis::{AnalysisTransport, Endpoint};
use crate::device::{
    CameraBackend, DeviceError, MediaStream, MediaTrack, VideoConstraints, VideoSource,
};
use crate::sampler::FramePayload;

pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80)
        .encode_image(&image)
        .expect("encode test jpeg");
    out
}

pub(crate) fn test_frame() -> FramePayload {
    FramePayload {
        jpeg: jpeg_bytes(16, 12),
        width: 16,
        height: 12,
        captured_at: Utc::now(),
    }
}

pub(crate) struct FakeCamera {
    opens: AtomicUsize,
    stops: Arc<AtomicUsize>,
    deny: AtomicBool,
    dimensions: (u32, u32),
}

impl FakeCamera {
    pub(crate) fn new() -> Self {
        Self::with_dimensions((64, 48))
    }

    pub(crate) fn denying() -> Self {
        let camera = Self::new();
        camera.set_deny(true);
        camera
    }

    pub(crate) fn warming_up() -> Self {
        Self::with_dimensions((0, 0))
    }

    fn with_dimensions(dimensions: (u32, u32)) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            deny: AtomicBool::new(false),
            dimensions,
        }
    }

    pub(crate) fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Successful acquisitions.
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CameraBackend for FakeCamera {
    fn open(&self, _constraints: &VideoConstraints) -> Result<MediaStream, DeviceError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied("NotAllowedError".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream {
            tracks: vec![Arc::new(CountingTrack {
                stops: Arc::clone(&self.stops),
            })],
            video: Arc::new(SolidVideo {
                dimensions: self.dimensions,
            }),
        })
    }
}

struct CountingTrack {
    stops: Arc<AtomicUsize>,
}

impl MediaTrack for CountingTrack {
    fn label(&self) -> &str {
        "fake video"
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct SolidVideo {
    dimensions: (u32, u32),
}

impl VideoSource for SolidVideo {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn latest_frame(&self) -> Option<RgbImage> {
        let (width, height) = self.dimensions;
        if width == 0 || height == 0 {
            return None;
        }
        Some(RgbImage::from_pixel(width, height, Rgb([40, 80, 120])))
    }
}

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    Fail(String),
}

/// One scripted endpoint. While held, requests park until released.
struct Channel {
    reply: Mutex<Reply>,
    calls: AtomicUsize,
    held: AtomicBool,
    gate: Semaphore,
}

impl Channel {
    fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    async fn respond(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|err| anyhow!("gate closed: {err}"))?
                .forget();
        }
        let reply = self.reply.lock().expect("reply lock").clone();
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Fail(reason) => Err(anyhow!(reason)),
        }
    }

    fn set(&self, reply: Reply) {
        *self.reply.lock().expect("reply lock") = reply;
    }
}

pub(crate) struct FakeTransport {
    metrics: Channel,
    overlay: Channel,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            metrics: Channel::new(Reply::Body(
                br#"{"score": 80, "grade": "B", "issues": [], "recommendations": [], "angles": {}}"#
                    .to_vec(),
            )),
            overlay: Channel::new(Reply::Body(jpeg_bytes(32, 24))),
        }
    }

    pub(crate) fn reply_metrics_json(&self, body: &str) {
        self.metrics.set(Reply::Body(body.as_bytes().to_vec()));
    }

    pub(crate) fn fail_metrics(&self, reason: &str) {
        self.metrics.set(Reply::Fail(reason.to_string()));
    }

    pub(crate) fn reply_overlay(&self, body: Vec<u8>) {
        self.overlay.set(Reply::Body(body));
    }

    pub(crate) fn fail_overlay(&self, reason: &str) {
        self.overlay.set(Reply::Fail(reason.to_string()));
    }

    pub(crate) fn hold_metrics(&self) {
        self.metrics.held.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_metrics(&self) {
        self.metrics.held.store(false, Ordering::SeqCst);
        self.metrics.gate.add_permits(16);
    }

    pub(crate) fn hold_overlay(&self) {
        self.overlay.held.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_overlay(&self) {
        self.overlay.held.store(false, Ordering::SeqCst);
        self.overlay.gate.add_permits(16);
    }

    pub(crate) fn metrics_calls(&self) -> usize {
        self.metrics.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn overlay_calls(&self) -> usize {
        self.overlay.calls.load(Ordering::SeqCst)
    }
}

impl AnalysisTransport for FakeTransport {
    fn post_frame<'a>(
        &'a self,
        endpoint: Endpoint,
        _frame: &'a FramePayload,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        match endpoint {
            Endpoint::MetricsJson => self.metrics.respond().boxed(),
            Endpoint::Overlay => self.overlay.respond().boxed(),
        }
    }

    fn get_health(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
        async { Ok(br#"{"status": "ok", "message": "PhysioLens API is running"}"#.to_vec()) }
            .boxed()
    }
}

/// Polls `check` until it holds, failing the test after two seconds.
pub(crate) async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
