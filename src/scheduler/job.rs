use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Default)]
struct JobCounters {
    started: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the in-flight flag when the unit finishes, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A ticker task running one unit of work per period, with at most one unit
/// in flight. A tick that lands while a unit is still running is dropped.
///
/// The in-flight flag belongs to the caller. A job started on a flag whose
/// unit from an earlier, cancelled job is still pending skips its ticks until
/// that unit finishes.
pub struct PeriodicJob {
    name: &'static str,
    period: Duration,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<JobCounters>,
}

impl PeriodicJob {
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        in_flight: Arc<AtomicBool>,
        work: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let counters = Arc::new(JobCounters::default());

        let handle = tokio::spawn(job_loop(
            name,
            period,
            work,
            cancel_token.clone(),
            Arc::clone(&in_flight),
            Arc::clone(&counters),
        ));

        log_info!("{name} job started ({} ms)", period.as_millis());

        Self {
            name,
            period,
            cancel_token,
            handle: Some(handle),
            in_flight,
            counters,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn units_started(&self) -> u64 {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.counters.skipped.load(Ordering::SeqCst)
    }

    /// Stops future ticks. Returns without waiting for an in-flight unit.
    pub fn cancel(&mut self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        self.cancel_token.cancel();
        // The loop exits on its own at the next select; dropping the handle detaches it.
        self.handle.take();
        log_info!(
            "{} job cancelled after {} unit(s), {} skipped tick(s)",
            self.name,
            self.units_started(),
            self.ticks_skipped()
        );
    }
}

impl Drop for PeriodicJob {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn job_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    work: F,
    cancel_token: CancellationToken,
    in_flight: Arc<AtomicBool>,
    counters: Arc<JobCounters>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // First tick after one full period, like a browser interval.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_debug!("{name} job loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if in_flight.swap(true, Ordering::SeqCst) {
                    counters.skipped.fetch_add(1, Ordering::SeqCst);
                    log_debug!("{name} tick skipped, previous unit still in flight");
                    continue;
                }
                counters.started.fetch_add(1, Ordering::SeqCst);

                let guard = InFlightGuard(Arc::clone(&in_flight));
                let unit = work();
                tokio::spawn(async move {
                    let _guard = guard;
                    unit.await;
                });
            }
        }
    }
}
