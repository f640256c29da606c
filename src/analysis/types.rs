use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Letter grade for a 0-100 posture score.
pub fn grade_for_score(score: f64) -> &'static str {
    match score {
        s if s >= 95.0 => "A+",
        s if s >= 90.0 => "A",
        s if s >= 85.0 => "B+",
        s if s >= 80.0 => "B",
        s if s >= 75.0 => "C+",
        s if s >= 70.0 => "C",
        s if s >= 60.0 => "D",
        _ => "F",
    }
}

/// Structured result of one metrics round trip.
///
/// Field names on the wire follow the analysis service (`score`, `grade`,
/// `issues`, `recommendations`, `angles`). A grade supplied by the service is
/// kept verbatim; a missing one is derived from the score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResult {
    #[serde(rename = "score")]
    overall_score: f64,
    #[serde(default)]
    grade: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    angles: BTreeMap<String, f64>,
}

impl MetricsResult {
    pub fn new(
        overall_score: f64,
        grade: Option<String>,
        issues: Vec<String>,
        recommendations: Vec<String>,
        angles: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            overall_score,
            grade: grade.unwrap_or_default(),
            issues,
            recommendations,
            angles,
        }
        .normalized()
    }

    /// Clamps the score into 0-100 and fills in a missing grade.
    pub(crate) fn normalized(mut self) -> Self {
        if !self.overall_score.is_finite() {
            self.overall_score = 0.0;
        }
        self.overall_score = self.overall_score.clamp(0.0, 100.0);
        if self.grade.trim().is_empty() {
            self.grade = grade_for_score(self.overall_score).to_string();
        }
        self
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    pub fn grade(&self) -> &str {
        &self.grade
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn angles(&self) -> &BTreeMap<String, f64> {
        &self.angles
    }
}

/// What the gateway hands back for one metrics request.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsOutcome {
    Live(MetricsResult),
    /// Synthesized stand-in after a failed round trip.
    Degraded { result: MetricsResult, reason: String },
    /// Only produced under [`MetricsFailurePolicy::Surface`].
    Failed { reason: String },
}

impl MetricsOutcome {
    pub fn result(&self) -> Option<&MetricsResult> {
        match self {
            MetricsOutcome::Live(result) | MetricsOutcome::Degraded { result, .. } => Some(result),
            MetricsOutcome::Failed { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, MetricsOutcome::Degraded { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MetricsFailurePolicy {
    /// Keep the UI populated with a synthesized, clearly flagged result.
    Fallback,
    /// Leave the current result alone and report the failure as an error.
    Surface,
}

impl Default for MetricsFailurePolicy {
    fn default() -> Self {
        MetricsFailurePolicy::Fallback
    }
}

/// Decoded overlay frame plus the overlay epoch it was requested under.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    image: RgbaImage,
    epoch: u64,
    received_at: DateTime<Utc>,
}

impl OverlayImage {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            epoch: 0,
            received_at: Utc::now(),
        }
    }

    pub fn issued_under(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// An overlay may only be shown while the overlay is on and no newer
    /// overlay schedule has replaced the one it was requested under.
    pub fn is_valid_for(&self, current_epoch: u64, overlay_enabled: bool) -> bool {
        overlay_enabled && self.epoch == current_epoch
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}
