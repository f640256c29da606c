use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::MetricsFailurePolicy, device::VideoConstraints, history::DEFAULT_HISTORY_CAPACITY,
    sampler::DEFAULT_JPEG_QUALITY,
};

pub const CONFIG_PATH_ENV: &str = "PHYSIOLENS_CONFIG";
pub const SERVICE_URL_ENV: &str = "PHYSIOLENS_SERVICE_URL";
pub const DEBUG_ENV: &str = "PHYSIOLENS_DEBUG";

const DEFAULT_CONFIG_FILE: &str = "physiolens.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub service_url: String,
    pub overlay_period_ms: u64,
    pub metrics_period_ms: u64,
    pub history_capacity: usize,
    pub jpeg_quality: u8,
    /// No timeout when absent; a hung request then holds its job's in-flight slot.
    pub request_timeout_ms: Option<u64>,
    pub overlay_enabled_by_default: bool,
    pub metrics_failure_policy: MetricsFailurePolicy,
    pub video: VideoConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000/api".into(),
            overlay_period_ms: 200,
            metrics_period_ms: 2000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            request_timeout_ms: None,
            overlay_enabled_by_default: true,
            metrics_failure_policy: MetricsFailurePolicy::Fallback,
            video: VideoConstraints::default(),
        }
    }
}

impl SessionConfig {
    /// Reads a JSON config file. A missing file yields defaults; an
    /// unparseable one is logged and also yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("Ignoring malformed config {}: {err}", path.display());
            Self::default()
        }))
    }

    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(SERVICE_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.service_url = url.trim().to_string();
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn overlay_period(&self) -> Duration {
        Duration::from_millis(self.overlay_period_ms.max(1))
    }

    pub fn metrics_period(&self) -> Duration {
        Duration::from_millis(self.metrics_period_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"metricsPeriodMs": 500, "video": {"idealWidth": 1280}}"#)
                .unwrap();

        assert_eq!(config.metrics_period(), Duration::from_millis(500));
        assert_eq!(config.overlay_period(), Duration::from_millis(200));
        assert_eq!(config.video.ideal_width, 1280);
        assert_eq!(config.video.ideal_height, 480);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = SessionConfig::load(Path::new("/nonexistent/physiolens.json")).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn service_url_override() {
        let mut config = SessionConfig::default();
        config.apply_overrides(|key| {
            (key == SERVICE_URL_ENV).then(|| "http://analysis.local:9000/api".to_string())
        });
        assert_eq!(config.service_url, "http://analysis.local:9000/api");

        config.apply_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.service_url, "http://analysis.local:9000/api");
    }

    #[test]
    fn failure_policy_round_trips_by_name() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"metricsFailurePolicy": "surface"}"#).unwrap();
        assert_eq!(config.metrics_failure_policy, MetricsFailurePolicy::Surface);
    }
}
