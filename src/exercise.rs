//! Guided exercise mode: the same camera contract as a posture session, but
//! feedback comes from one still frame when asked for instead of a schedule.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use serde::Serialize;

use crate::{
    analysis::{AnalysisGateway, MetricsOutcome, MetricsResult},
    device::{CameraBackend, DeviceManager, DeviceState, VideoConstraints},
    sampler::FrameSampler,
};

pub const DEFAULT_FEEDBACK: &str = "Start the exercise to get feedback.";
pub const CAMERA_FAILED_FEEDBACK: &str = "Could not access camera. Please check permissions.";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub key: &'static str,
    pub name: &'static str,
    pub video_id: &'static str,
}

impl Exercise {
    /// Looping, muted embed of the tutorial video.
    pub fn tutorial_url(&self) -> String {
        format!(
            "https://www.youtube.com/embed/{id}?autoplay=1&mute=1&loop=1&playlist={id}&controls=0&modestbranding=1&rel=0",
            id = self.video_id
        )
    }
}

pub const EXERCISES: [Exercise; 3] = [
    Exercise {
        key: "shoulder_squeeze",
        name: "Shoulder Blade Squeeze",
        video_id: "zwa7jKdtLAQ",
    },
    Exercise {
        key: "neck_stretch",
        name: "Neck Stretch",
        video_id: "H5h54Q0wpps",
    },
    Exercise {
        key: "squat",
        name: "Squat",
        video_id: "xqvCmoLULNY",
    },
];

pub fn find_exercise(key: &str) -> Option<&'static Exercise> {
    EXERCISES.iter().find(|exercise| exercise.key == key)
}

pub struct ExerciseSession {
    device: DeviceManager,
    gateway: Arc<AnalysisGateway>,
    sampler: FrameSampler,
    constraints: VideoConstraints,
    selected: &'static Exercise,
    feedback: String,
}

impl ExerciseSession {
    pub fn new(
        camera: Arc<dyn CameraBackend>,
        gateway: Arc<AnalysisGateway>,
        sampler: FrameSampler,
        constraints: VideoConstraints,
    ) -> Self {
        Self {
            device: DeviceManager::new(camera),
            gateway,
            sampler,
            constraints,
            selected: &EXERCISES[0],
            feedback: DEFAULT_FEEDBACK.to_string(),
        }
    }

    pub fn selected(&self) -> &'static Exercise {
        self.selected
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn camera_state(&self) -> DeviceState {
        self.device.state()
    }

    pub fn select(&mut self, key: &str) -> Result<&'static Exercise> {
        let exercise = find_exercise(key).ok_or_else(|| anyhow!("unknown exercise: {key}"))?;
        self.selected = exercise;
        info!("Selected exercise {}", exercise.name);
        Ok(exercise)
    }

    pub async fn start_camera(&mut self) -> Result<()> {
        if self.device.state() == DeviceState::Active {
            return Ok(());
        }
        if let Err(err) = self.device.acquire(self.constraints.clone()).await {
            warn!("Exercise camera failed: {err}");
            self.feedback = CAMERA_FAILED_FEEDBACK.to_string();
            return Err(err.into());
        }
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        self.device.release();
    }

    /// Sends the current frame for analysis and returns the feedback line.
    pub async fn request_feedback(&mut self) -> Result<String> {
        let Some(feed) = self.device.feed() else {
            bail!("camera is not active");
        };

        let sampler = self.sampler;
        let frame = tokio::task::spawn_blocking(move || sampler.capture(&feed)).await??;
        let outcome = self.gateway.fetch_metrics(&frame).await;

        self.feedback = match &outcome {
            MetricsOutcome::Live(result) => describe(self.selected, result),
            MetricsOutcome::Degraded { result, reason } => {
                format!("{} ({reason})", describe(self.selected, result))
            }
            MetricsOutcome::Failed { reason } => reason.clone(),
        };
        Ok(self.feedback.clone())
    }
}

fn describe(exercise: &Exercise, result: &MetricsResult) -> String {
    let mut line = format!(
        "{}: form score {:.0} ({})",
        exercise.name,
        result.overall_score(),
        result.grade()
    );
    match result.issues().first() {
        Some(issue) => line.push_str(&format!(". Watch for: {issue}")),
        None => line.push_str(". Good form"),
    }
    if let Some(tip) = result.recommendations().first() {
        line.push_str(&format!(". Tip: {tip}"));
    }
    line
}
