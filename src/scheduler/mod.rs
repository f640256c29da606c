pub mod job;

use std::{
    future::Future,
    sync::{atomic::AtomicBool, Arc},
};

use tokio::time::Duration;

pub use job::PeriodicJob;

pub const DEFAULT_OVERLAY_PERIOD: Duration = Duration::from_millis(200);
pub const DEFAULT_METRICS_PERIOD: Duration = Duration::from_millis(2000);

/// The two independently paced jobs of an analysis session. Gating on device
/// state and enable flags lives in the units themselves; this type only owns
/// job lifetimes.
///
/// Each job kind keeps one in-flight flag for the scheduler's whole life, so
/// restarting a job never runs a second unit beside one still pending.
pub struct DualScheduler {
    overlay_period: Duration,
    metrics_period: Duration,
    overlay: Option<PeriodicJob>,
    metrics: Option<PeriodicJob>,
    overlay_in_flight: Arc<AtomicBool>,
    metrics_in_flight: Arc<AtomicBool>,
}

impl DualScheduler {
    pub fn new(overlay_period: Duration, metrics_period: Duration) -> Self {
        Self {
            overlay_period,
            metrics_period,
            overlay: None,
            metrics: None,
            overlay_in_flight: Arc::new(AtomicBool::new(false)),
            metrics_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start_metrics<F, Fut>(&mut self, work: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop_metrics();
        self.metrics = Some(PeriodicJob::spawn(
            "metrics",
            self.metrics_period,
            Arc::clone(&self.metrics_in_flight),
            work,
        ));
    }

    pub fn start_overlay<F, Fut>(&mut self, work: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop_overlay();
        self.overlay = Some(PeriodicJob::spawn(
            "overlay",
            self.overlay_period,
            Arc::clone(&self.overlay_in_flight),
            work,
        ));
    }

    pub fn stop_metrics(&mut self) {
        if let Some(mut job) = self.metrics.take() {
            job.cancel();
        }
    }

    pub fn stop_overlay(&mut self) {
        if let Some(mut job) = self.overlay.take() {
            job.cancel();
        }
    }

    pub fn stop_all(&mut self) {
        self.stop_overlay();
        self.stop_metrics();
    }

    pub fn overlay_running(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn metrics_running(&self) -> bool {
        self.metrics.is_some()
    }

    pub fn overlay_job(&self) -> Option<&PeriodicJob> {
        self.overlay.as_ref()
    }

    pub fn metrics_job(&self) -> Option<&PeriodicJob> {
        self.metrics.as_ref()
    }
}

impl Default for DualScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAY_PERIOD, DEFAULT_METRICS_PERIOD)
    }
}
