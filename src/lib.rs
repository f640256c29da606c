pub mod analysis;
pub mod cli;
pub mod config;
pub mod device;
pub mod exercise;
pub mod history;
pub mod overlay;
pub mod sampler;
pub mod scheduler;
pub mod session;
mod utils;

#[cfg(test)]
mod testing;

use clap::Parser;

pub use analysis::{AnalysisGateway, MetricsFailurePolicy, MetricsOutcome, MetricsResult};
pub use config::SessionConfig;
pub use device::{CameraBackend, DeviceState, PatternCamera};
pub use session::{SessionController, SessionEvent, SessionPhase, SessionSnapshot};

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Initialize logging (reads RUST_LOG env var)
    let default_level = if config::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(default_level)
        .init();

    log::info!("PhysioLens starting up...");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(cli::dispatch(cli))
}
