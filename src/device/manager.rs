use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use image::RgbImage;
use log::{info, warn};
use uuid::Uuid;

use super::{DeviceError, DeviceState, VideoConstraints};

/// One constituent track of an acquired stream.
pub trait MediaTrack: Send + Sync {
    fn label(&self) -> &str;
    fn stop(&self);
}

/// The decoded side of a stream.
pub trait VideoSource: Send + Sync {
    /// `(0, 0)` until the first frame has been decoded.
    fn dimensions(&self) -> (u32, u32);
    fn latest_frame(&self) -> Option<RgbImage>;
}

pub struct MediaStream {
    pub tracks: Vec<Arc<dyn MediaTrack>>,
    pub video: Arc<dyn VideoSource>,
}

/// Hardware boundary. `open` may block (driver negotiation, permission
/// prompts) and is always called from the blocking pool.
pub trait CameraBackend: Send + Sync + 'static {
    fn open(&self, constraints: &VideoConstraints) -> Result<MediaStream, DeviceError>;
}

/// Ownership token for an acquired stream. Tracks are stopped exactly once,
/// either through [`StreamHandle::release`] or when the handle is dropped.
pub struct StreamHandle {
    id: Uuid,
    stream: MediaStream,
    active: Arc<AtomicBool>,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl StreamHandle {
    fn new(stream: MediaStream) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            active: Arc::new(AtomicBool::new(true)),
            acquired_at: Utc::now(),
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn feed(&self) -> VideoFeed {
        VideoFeed {
            stream_id: self.id,
            video: Arc::clone(&self.stream.video),
            active: Arc::clone(&self.active),
        }
    }

    fn release(mut self) {
        self.stop_tracks();
    }

    fn stop_tracks(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.active.store(false, Ordering::SeqCst);
        for track in &self.stream.tracks {
            info!("Stopping track {} of stream {}", track.label(), self.id);
            track.stop();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Read-only view of an acquired stream handed to the sampler. Reports
/// inactive as soon as the owning handle is released.
#[derive(Clone)]
pub struct VideoFeed {
    stream_id: Uuid,
    video: Arc<dyn VideoSource>,
    active: Arc<AtomicBool>,
}

impl VideoFeed {
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.video.dimensions()
    }

    pub fn latest_frame(&self) -> Option<RgbImage> {
        self.video.latest_frame()
    }
}

impl fmt::Debug for VideoFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFeed")
            .field("stream_id", &self.stream_id)
            .field("active", &self.is_active())
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

pub struct DeviceManager {
    backend: Arc<dyn CameraBackend>,
    state: DeviceState,
    handle: Option<StreamHandle>,
}

impl DeviceManager {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            state: DeviceState::Idle,
            handle: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn feed(&self) -> Option<VideoFeed> {
        self.handle.as_ref().map(StreamHandle::feed)
    }

    pub async fn acquire(&mut self, constraints: VideoConstraints) -> Result<VideoFeed, DeviceError> {
        if self.handle.is_some() {
            return Err(DeviceError::AlreadyActive);
        }

        self.state = DeviceState::Requesting;
        info!(
            "Requesting camera ({}x{}, {:?})",
            constraints.ideal_width, constraints.ideal_height, constraints.facing_mode
        );

        // The handle is built on the blocking thread so that an abandoned
        // acquisition still stops its tracks when the result is dropped.
        let backend = Arc::clone(&self.backend);
        let opened = tokio::task::spawn_blocking(move || {
            backend.open(&constraints).map(StreamHandle::new)
        })
        .await
        .unwrap_or_else(|err| {
            Err(DeviceError::Unavailable(format!(
                "camera worker join failed: {err}"
            )))
        });

        match opened {
            Ok(handle) => {
                let feed = handle.feed();
                info!(
                    "Camera stream {} acquired with {} track(s)",
                    handle.id(),
                    handle.stream.tracks.len()
                );
                self.handle = Some(handle);
                self.state = DeviceState::Active;
                Ok(feed)
            }
            Err(err) => {
                warn!("Camera access failed: {err}");
                self.state = DeviceState::Error;
                Err(err)
            }
        }
    }

    /// Stops every track of the held stream. No-op when nothing is held.
    pub fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Releasing camera stream {}", handle.id());
        handle.release();
        self.state = DeviceState::Idle;
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCamera;

    #[tokio::test]
    async fn acquire_then_release_stops_tracks_once() {
        let camera = Arc::new(FakeCamera::new());
        let mut manager = DeviceManager::new(camera.clone());

        let feed = manager.acquire(VideoConstraints::default()).await.unwrap();
        assert_eq!(manager.state(), DeviceState::Active);
        assert!(feed.is_active());

        manager.release();
        manager.release();

        assert_eq!(manager.state(), DeviceState::Idle);
        assert!(!feed.is_active());
        assert_eq!(camera.opens(), 1);
        assert_eq!(camera.stops(), 1);
    }

    #[tokio::test]
    async fn denied_acquisition_lands_in_error() {
        let camera = Arc::new(FakeCamera::denying());
        let mut manager = DeviceManager::new(camera.clone());

        let err = manager
            .acquire(VideoConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert_eq!(manager.state(), DeviceState::Error);
        assert!(manager.feed().is_none());

        manager.release();
        assert_eq!(manager.state(), DeviceState::Error);
        assert_eq!(camera.stops(), 0);

        camera.set_deny(false);
        manager.acquire(VideoConstraints::default()).await.unwrap();
        assert_eq!(manager.state(), DeviceState::Active);
    }

    #[tokio::test]
    async fn second_acquire_keeps_existing_stream() {
        let camera = Arc::new(FakeCamera::new());
        let mut manager = DeviceManager::new(camera.clone());
        let feed = manager.acquire(VideoConstraints::default()).await.unwrap();

        let err = manager
            .acquire(VideoConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::AlreadyActive);
        assert!(feed.is_active());
        assert_eq!(camera.opens(), 1);
        assert_eq!(camera.stops(), 0);
    }

    #[tokio::test]
    async fn dropping_manager_releases_stream() {
        let camera = Arc::new(FakeCamera::new());
        let feed = {
            let mut manager = DeviceManager::new(camera.clone());
            manager.acquire(VideoConstraints::default()).await.unwrap()
        };

        assert!(!feed.is_active());
        assert_eq!(camera.stops(), 1);
    }

    #[tokio::test]
    async fn feed_debug_shows_stream_and_activity() {
        let mut manager = DeviceManager::new(Arc::new(FakeCamera::new()));
        let feed = manager.acquire(VideoConstraints::default()).await.unwrap();

        let shown = format!("{feed:?}");
        assert!(shown.contains(&feed.stream_id().to_string()));
        assert!(shown.contains("active: true"));
        assert!(shown.contains("(64, 48)"));

        manager.release();
        assert!(format!("{feed:?}").contains("active: false"));
    }
}
