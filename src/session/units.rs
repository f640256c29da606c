//! The per-tick work of the two analysis jobs.
//!
//! Each unit checks its gate before capturing and again before applying, so a
//! result that arrives after stop, toggle or release is dropped on the floor.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};

use crate::{
    analysis::AnalysisGateway,
    device::VideoFeed,
    overlay::OverlayRenderer,
    sampler::{FramePayload, FrameSampler},
};

use super::{SessionEvent, SessionState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

#[derive(Clone)]
pub(crate) struct JobContext {
    pub state: Arc<Mutex<SessionState>>,
    pub renderer: Arc<Mutex<OverlayRenderer>>,
    pub gateway: Arc<AnalysisGateway>,
    pub sampler: FrameSampler,
    pub feed: VideoFeed,
    pub events: broadcast::Sender<SessionEvent>,
}

impl JobContext {
    async fn capture(&self) -> Option<FramePayload> {
        let sampler = self.sampler;
        let feed = self.feed.clone();
        match tokio::task::spawn_blocking(move || sampler.capture(&feed)).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(err)) => {
                log_debug!("skipping tick: {err}");
                None
            }
            Err(err) => {
                log_error!("capture worker join failed: {err}");
                None
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

pub(crate) async fn metrics_unit(ctx: JobContext, epoch: u64) {
    if !ctx.state.lock().await.metrics_gate_open(epoch) {
        return;
    }
    let Some(frame) = ctx.capture().await else {
        return;
    };

    let outcome = ctx.gateway.fetch_metrics(&frame).await;

    let event = {
        let mut state = ctx.state.lock().await;
        if !state.metrics_gate_open(epoch) {
            log_debug!("discarding metrics result from retired schedule {epoch}");
            return;
        }
        state.apply_metrics(outcome, Utc::now())
    };
    ctx.emit(event);
}

pub(crate) async fn overlay_unit(ctx: JobContext, epoch: u64) {
    if !ctx.state.lock().await.overlay_gate_open(epoch) {
        return;
    }
    let Some(frame) = ctx.capture().await else {
        return;
    };

    let Some(overlay) = ctx.gateway.fetch_overlay(&frame).await else {
        return;
    };
    let overlay = overlay.issued_under(epoch);

    let (width, height) = {
        let mut state = ctx.state.lock().await;
        if !state.overlay_gate_open(epoch)
            || !overlay.is_valid_for(state.overlay_epoch(), state.overlay_enabled)
        {
            log_debug!("discarding overlay from retired schedule {epoch}");
            return;
        }
        let mut renderer = ctx.renderer.lock().await;
        renderer.render(&overlay, ctx.feed.dimensions());
        state.latest_overlay = Some(overlay);
        renderer.dimensions()
    };
    ctx.emit(SessionEvent::OverlayRendered { width, height });
}
