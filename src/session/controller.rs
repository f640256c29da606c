use std::sync::Arc;

use anyhow::{bail, Result};
use image::RgbaImage;
use log::{info, warn};
use tokio::sync::{broadcast, Mutex};

use crate::{
    analysis::{AnalysisGateway, HttpTransport},
    config::SessionConfig,
    device::{CameraBackend, DeviceManager, DeviceState, VideoConstraints, VideoFeed},
    history::HistoryEntry,
    overlay::OverlayRenderer,
    sampler::FrameSampler,
    scheduler::DualScheduler,
};

use super::{
    units::{metrics_unit, overlay_unit, JobContext},
    SessionEvent, SessionPhase, SessionSnapshot, SessionState,
};

const EVENT_CAPACITY: usize = 64;

/// Owns one visual session: the camera, the two analysis jobs and everything
/// they produce. Clones share the same session. Dropping the last clone
/// releases the camera and cancels both jobs.
///
/// Locks are always taken in the order device, scheduler, state, renderer.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    device: Arc<Mutex<DeviceManager>>,
    scheduler: Arc<Mutex<DualScheduler>>,
    renderer: Arc<Mutex<OverlayRenderer>>,
    gateway: Arc<AnalysisGateway>,
    sampler: FrameSampler,
    events: broadcast::Sender<SessionEvent>,
    constraints: VideoConstraints,
    overlay_by_default: bool,
}

impl SessionController {
    pub fn new(
        camera: Arc<dyn CameraBackend>,
        gateway: AnalysisGateway,
        config: &SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SessionState::new(config.history_capacity))),
            device: Arc::new(Mutex::new(DeviceManager::new(camera))),
            scheduler: Arc::new(Mutex::new(DualScheduler::new(
                config.overlay_period(),
                config.metrics_period(),
            ))),
            renderer: Arc::new(Mutex::new(OverlayRenderer::new())),
            gateway: Arc::new(gateway),
            sampler: FrameSampler::new(config.jpeg_quality),
            events,
            constraints: config.video.clone(),
            overlay_by_default: config.overlay_enabled_by_default,
        }
    }

    /// Controller talking to the analysis service over HTTP at `config.service_url`.
    pub fn connect(camera: Arc<dyn CameraBackend>, config: &SessionConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.service_url.clone())?;
        let gateway = AnalysisGateway::new(
            Arc::new(transport),
            config.metrics_failure_policy,
            config.request_timeout(),
        );
        Ok(Self::new(camera, gateway, config))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn gateway(&self) -> &AnalysisGateway {
        &self.gateway
    }

    pub fn renderer(&self) -> Arc<Mutex<OverlayRenderer>> {
        Arc::clone(&self.renderer)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().await.history.entries().cloned().collect()
    }

    /// Latest camera frame with the overlay surface blended on top.
    pub async fn composite_frame(&self) -> Option<RgbaImage> {
        let feed = self.device.lock().await.feed()?;
        let frame = feed.latest_frame()?;
        Some(self.renderer.lock().await.composite(&frame))
    }

    pub async fn start_device(&self) -> Result<SessionSnapshot> {
        let mut device = self.device.lock().await;
        if device.state() == DeviceState::Active {
            bail!("camera already active");
        }

        self.state.lock().await.device = DeviceState::Requesting;
        self.emit_state_changed().await;

        let acquired = device.acquire(self.constraints.clone()).await;
        {
            let mut state = self.state.lock().await;
            state.device = device.state();
            match &acquired {
                Ok(feed) => {
                    state.overlay_enabled = self.overlay_by_default;
                    state.last_error = None;
                    info!("Session device active (stream {})", feed.stream_id());
                }
                Err(err) => {
                    warn!("Session device failed: {err}");
                    state.last_error = Some(err.to_string());
                }
            }
        }
        drop(device);

        self.emit_state_changed().await;
        acquired?;
        Ok(self.snapshot().await)
    }

    pub async fn start_analysis(&self) -> Result<SessionSnapshot> {
        let device = self.device.lock().await;
        let mut scheduler = self.scheduler.lock().await;
        let mut state = self.state.lock().await;

        match state.phase() {
            SessionPhase::DeviceActive => {}
            SessionPhase::Analyzing => bail!("analysis already running"),
            SessionPhase::Setup => bail!("camera is not active"),
        }
        let Some(feed) = device.feed() else {
            bail!("camera is not active");
        };

        let ctx = self.job_context(feed);
        let metrics_epoch = state.begin_analysis();
        {
            let ctx = ctx.clone();
            scheduler.start_metrics(move || metrics_unit(ctx.clone(), metrics_epoch));
        }
        if state.overlay_enabled {
            let overlay_epoch = state.arm_overlay();
            scheduler.start_overlay(move || overlay_unit(ctx.clone(), overlay_epoch));
        }
        info!(
            "Analysis started (overlay {})",
            if state.overlay_enabled { "on" } else { "off" }
        );

        let snapshot = state.snapshot();
        drop(state);
        drop(scheduler);
        drop(device);

        self.emit(SessionEvent::StateChanged {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Cancels both jobs and keeps history. A no-op unless analysis is running.
    pub async fn stop_analysis(&self) -> SessionSnapshot {
        let mut scheduler = self.scheduler.lock().await;
        let mut state = self.state.lock().await;
        if !state.analysis_enabled {
            return state.snapshot();
        }

        halt_analysis(&mut scheduler, &mut state);
        let snapshot = state.snapshot();
        drop(state);
        drop(scheduler);

        self.emit(SessionEvent::StateChanged {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Valid from any state.
    pub async fn stop_device(&self) -> SessionSnapshot {
        let mut device = self.device.lock().await;
        let mut scheduler = self.scheduler.lock().await;
        let mut state = self.state.lock().await;

        if state.analysis_enabled {
            halt_analysis(&mut scheduler, &mut state);
        }
        device.release();

        state.device = device.state();
        state.overlay_enabled = false;
        state.latest_overlay = None;
        self.renderer.lock().await.clear();

        let snapshot = state.snapshot();
        drop(state);
        drop(scheduler);
        drop(device);

        self.emit(SessionEvent::StateChanged {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Flips the overlay while analysis runs and returns the new flag. Turning
    /// it off stops the overlay job and blanks the surface; metrics keep going.
    pub async fn toggle_overlay(&self) -> Result<bool> {
        let device = self.device.lock().await;
        let mut scheduler = self.scheduler.lock().await;
        let mut state = self.state.lock().await;

        if state.phase() != SessionPhase::Analyzing {
            bail!("overlay can only be toggled while analysis is running");
        }

        let enabled = if state.overlay_enabled {
            scheduler.stop_overlay();
            state.disarm_overlay();
            self.renderer.lock().await.clear();
            false
        } else {
            let Some(feed) = device.feed() else {
                bail!("camera is not active");
            };
            let epoch = state.arm_overlay();
            let ctx = self.job_context(feed);
            scheduler.start_overlay(move || overlay_unit(ctx.clone(), epoch));
            true
        };
        info!("Overlay {}", if enabled { "enabled" } else { "disabled" });

        let snapshot = state.snapshot();
        drop(state);
        drop(scheduler);
        drop(device);

        self.emit(SessionEvent::StateChanged { snapshot });
        Ok(enabled)
    }

    /// Stops analysis and forgets every result. The camera stays as it is.
    pub async fn reset_session(&self) -> SessionSnapshot {
        let mut scheduler = self.scheduler.lock().await;
        let mut state = self.state.lock().await;

        if state.analysis_enabled {
            halt_analysis(&mut scheduler, &mut state);
        }
        state.clear_results();
        self.renderer.lock().await.clear();
        info!("Session reset");

        let snapshot = state.snapshot();
        drop(state);
        drop(scheduler);

        self.emit(SessionEvent::StateChanged {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    pub async fn teardown(&self) {
        self.stop_device().await;
        info!("Session torn down");
    }

    fn job_context(&self, feed: VideoFeed) -> JobContext {
        JobContext {
            state: Arc::clone(&self.state),
            renderer: Arc::clone(&self.renderer),
            gateway: Arc::clone(&self.gateway),
            sampler: self.sampler,
            feed,
            events: self.events.clone(),
        }
    }

    async fn emit_state_changed(&self) {
        let snapshot = self.snapshot().await;
        self.emit(SessionEvent::StateChanged { snapshot });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn halt_analysis(scheduler: &mut DualScheduler, state: &mut SessionState) {
    scheduler.stop_all();
    state.end_analysis();
    info!("Analysis stopped ({} result(s) kept)", state.history.len());
}
