use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    analysis::{MetricsOutcome, MetricsResult, OverlayImage},
    device::DeviceState,
    history::{HistoryAggregator, HistoryEntry, SessionStats},
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Setup,
    DeviceActive,
    Analyzing,
}

/// The result currently on display. A degraded result carries the reason it
/// stands in for a real measurement.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAnalysis {
    pub result: MetricsResult,
    pub degraded_reason: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl CurrentAnalysis {
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub device: DeviceState,
    pub analysis_enabled: bool,
    pub overlay_enabled: bool,
    pub current: Option<CurrentAnalysis>,
    pub has_overlay: bool,
    pub stats: SessionStats,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged { snapshot: SessionSnapshot },
    AnalysisUpdated { analysis: CurrentAnalysis },
    OverlayRendered { width: u32, height: u32 },
    AnalysisFailed { reason: String },
}

/// Everything the session shows, plus the epochs that let job units tell
/// whether their schedule is still the live one.
#[derive(Debug)]
pub struct SessionState {
    pub device: DeviceState,
    pub analysis_enabled: bool,
    pub overlay_enabled: bool,
    pub current: Option<CurrentAnalysis>,
    pub latest_overlay: Option<OverlayImage>,
    pub history: HistoryAggregator,
    pub last_error: Option<String>,
    metrics_epoch: u64,
    overlay_epoch: u64,
}

impl SessionState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            device: DeviceState::Idle,
            analysis_enabled: false,
            overlay_enabled: false,
            current: None,
            latest_overlay: None,
            history: HistoryAggregator::new(history_capacity),
            last_error: None,
            metrics_epoch: 0,
            overlay_epoch: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.device, self.analysis_enabled) {
            (DeviceState::Active, true) => SessionPhase::Analyzing,
            (DeviceState::Active, false) => SessionPhase::DeviceActive,
            _ => SessionPhase::Setup,
        }
    }

    pub fn metrics_epoch(&self) -> u64 {
        self.metrics_epoch
    }

    pub fn overlay_epoch(&self) -> u64 {
        self.overlay_epoch
    }

    pub fn metrics_gate_open(&self, epoch: u64) -> bool {
        self.device == DeviceState::Active && self.analysis_enabled && self.metrics_epoch == epoch
    }

    pub fn overlay_gate_open(&self, epoch: u64) -> bool {
        self.device == DeviceState::Active
            && self.analysis_enabled
            && self.overlay_enabled
            && self.overlay_epoch == epoch
    }

    /// Marks analysis on and returns the epoch for the new metrics schedule.
    pub fn begin_analysis(&mut self) -> u64 {
        self.analysis_enabled = true;
        self.metrics_epoch += 1;
        self.metrics_epoch
    }

    /// Invalidates both schedules. The overlay flag itself survives so the
    /// next start restores it.
    pub fn end_analysis(&mut self) {
        self.analysis_enabled = false;
        self.metrics_epoch += 1;
        self.overlay_epoch += 1;
    }

    pub fn arm_overlay(&mut self) -> u64 {
        self.overlay_enabled = true;
        self.overlay_epoch += 1;
        self.overlay_epoch
    }

    pub fn disarm_overlay(&mut self) {
        self.overlay_enabled = false;
        self.overlay_epoch += 1;
        self.latest_overlay = None;
    }

    /// Live results feed both the current slot and history. Degraded ones
    /// only fill the slot, so statistics stay real measurements.
    pub fn apply_metrics(&mut self, outcome: MetricsOutcome, now: DateTime<Utc>) -> SessionEvent {
        match outcome {
            MetricsOutcome::Live(result) => {
                self.history.append(HistoryEntry {
                    timestamp: now,
                    result: result.clone(),
                });
                self.last_error = None;
                self.set_current(result, None, now)
            }
            MetricsOutcome::Degraded { result, reason } => {
                self.set_current(result, Some(reason), now)
            }
            MetricsOutcome::Failed { reason } => {
                self.last_error = Some(reason.clone());
                SessionEvent::AnalysisFailed { reason }
            }
        }
    }

    fn set_current(
        &mut self,
        result: MetricsResult,
        degraded_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> SessionEvent {
        let analysis = CurrentAnalysis {
            result,
            degraded_reason,
            received_at: now,
        };
        self.current = Some(analysis.clone());
        SessionEvent::AnalysisUpdated { analysis }
    }

    pub fn clear_results(&mut self) {
        self.history.reset();
        self.current = None;
        self.latest_overlay = None;
        self.last_error = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            device: self.device,
            analysis_enabled: self.analysis_enabled,
            overlay_enabled: self.overlay_enabled,
            current: self.current.clone(),
            has_overlay: self.latest_overlay.is_some(),
            stats: self.history.stats(),
            last_error: self.last_error.clone(),
        }
    }
}
