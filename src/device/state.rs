use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Idle,
    Requesting,
    Active,
    Error,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::Idle
    }
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Idle => "idle",
            DeviceState::Requesting => "requesting",
            DeviceState::Active => "active",
            DeviceState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FacingMode {
    User,
    Environment,
}

impl Default for FacingMode {
    fn default() -> Self {
        FacingMode::User
    }
}

/// Requested capture format. Backends treat the sizes as hints and may
/// deliver whatever the hardware supports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing_mode: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            facing_mode: FacingMode::User,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera track fault: {0}")]
    TrackFault(String),
    #[error("camera already acquired")]
    AlreadyActive,
}
