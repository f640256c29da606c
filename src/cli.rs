use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    analysis::{AnalysisGateway, HttpTransport},
    config::SessionConfig,
    device::PatternCamera,
    exercise::{ExerciseSession, EXERCISES},
    sampler::FrameSampler,
    session::SessionController,
};

#[derive(Parser, Debug)]
#[command(version, about = "Live posture analysis session against a PhysioLens service")]
pub struct Cli {
    /// JSON config file. Falls back to $PHYSIOLENS_CONFIG, then ./physiolens.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Analysis service base URL, overriding the config file.
    #[arg(long, global = true)]
    pub service_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an analysis session and print session events as JSON lines.
    Session {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Start with the skeleton overlay off.
        #[arg(long)]
        no_overlay: bool,

        /// Write the final video frame with its overlay to this PNG.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Check that the analysis service is reachable.
    Probe,
    /// Get single-frame feedback for a guided exercise.
    Exercise {
        /// One of: shoulder_squeeze, neck_stretch, squat.
        #[arg(long, default_value = "shoulder_squeeze")]
        exercise: String,
    },
    /// Print the effective configuration.
    Config,
}

impl Cli {
    fn load_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::from_env()?,
        };
        if let Some(url) = &self.service_url {
            config.service_url = url.clone();
        }
        Ok(config)
    }
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    match cli.command {
        Command::Session {
            duration_secs,
            no_overlay,
            snapshot,
        } => {
            let config = SessionConfig {
                overlay_enabled_by_default: config.overlay_enabled_by_default && !no_overlay,
                ..config
            };
            drive_session(&config, duration_secs.map(Duration::from_secs), snapshot).await
        }
        Command::Probe => probe(&config).await,
        Command::Exercise { exercise } => run_exercise(&config, &exercise).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn http_gateway(config: &SessionConfig) -> Result<AnalysisGateway> {
    let transport = HttpTransport::new(config.service_url.clone())?;
    Ok(AnalysisGateway::new(
        Arc::new(transport),
        config.metrics_failure_policy,
        config.request_timeout(),
    ))
}

async fn drive_session(
    config: &SessionConfig,
    duration: Option<Duration>,
    snapshot_path: Option<PathBuf>,
) -> Result<()> {
    let controller = SessionController::connect(Arc::new(PatternCamera::new()), config)?;
    let mut events = controller.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("Failed to serialize session event: {err}"),
                },
                Err(RecvError::Lagged(missed)) => warn!("Dropped {missed} session event(s)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = run_until_stopped(&controller, duration).await;
    let finished = finish_session(&controller, snapshot_path.as_deref()).await;

    drop(controller);
    printer.abort();
    outcome.and(finished)
}

/// Writes the optional snapshot, then tears the session down whether or not
/// the write succeeded.
async fn finish_session(controller: &SessionController, snapshot_path: Option<&Path>) -> Result<()> {
    let saved = match snapshot_path {
        Some(path) => match controller.composite_frame().await {
            Some(frame) => frame
                .save(path)
                .with_context(|| format!("Failed to write snapshot to {}", path.display())),
            None => {
                warn!("No video frame available for snapshot");
                Ok(())
            }
        },
        None => Ok(()),
    };

    controller.teardown().await;
    let summary = controller.snapshot().await;
    info!(
        "Session finished: {} result(s), average {:?}",
        summary.stats.count, summary.stats.average_score
    );
    saved
}

async fn run_until_stopped(controller: &SessionController, duration: Option<Duration>) -> Result<()> {
    controller.start_device().await?;
    controller.start_analysis().await?;

    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }
    Ok(())
}

async fn probe(config: &SessionConfig) -> Result<()> {
    let health = http_gateway(config)?
        .health()
        .await
        .with_context(|| format!("Analysis service at {} is unreachable", config.service_url))?;

    println!("{}", serde_json::to_string(&health)?);
    if !health.is_ok() {
        anyhow::bail!("Analysis service reported status {}", health.status);
    }
    Ok(())
}

async fn run_exercise(config: &SessionConfig, key: &str) -> Result<()> {
    let mut session = ExerciseSession::new(
        Arc::new(PatternCamera::new()),
        Arc::new(http_gateway(config)?),
        FrameSampler::new(config.jpeg_quality),
        config.video.clone(),
    );
    let exercise = session.select(key).with_context(|| {
        let known: Vec<&str> = EXERCISES.iter().map(|exercise| exercise.key).collect();
        format!("Known exercises: {}", known.join(", "))
    })?;
    println!("Tutorial: {} ({})", exercise.name, exercise.tutorial_url());

    session.start_camera().await?;
    // Give the camera time to decode its first frame.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let feedback = session.request_feedback().await;
    session.stop_camera();

    println!("{}", feedback?);
    Ok(())
}
