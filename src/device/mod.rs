pub mod manager;
pub mod pattern;
pub mod state;

pub use manager::{
    CameraBackend, DeviceManager, MediaStream, MediaTrack, StreamHandle, VideoFeed, VideoSource,
};
pub use pattern::PatternCamera;
pub use state::{DeviceError, DeviceState, FacingMode, VideoConstraints};
