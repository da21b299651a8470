mod command;
mod config;
mod error;
mod fifo;
mod pwm;
mod scheduler;
mod sequencer;
mod sysfs;
#[cfg(test)]
mod testing;
mod ticker;
mod tune;

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info};

use command::CommandLoop;
use config::Config;
use pwm::PwmChannel;
use scheduler::Scheduler;
use sequencer::{ThreadDelay, ToneSequencer};
use sysfs::SysfsPwm;

/// Commands buffered between the pipe reader and the command loop.
const COMMAND_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (development); in production, systemd
    // provides environment variables via EnvironmentFile.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(&config)?;

    info!("Starting the shower chime service");

    // ── PWM ────────────────────────────────────────────────────────────────
    let hw = SysfsPwm::new(&config.pwm_chip, config.pwm_channel, config.write_timeout)
        .context("Failed to start PWM writer thread")?;
    let mut channel = PwmChannel::new(hw);
    channel
        .setup()
        .with_context(|| format!("Failed to set up PWM channel {}", config.pwm_channel))?;

    // ── Tick thread ────────────────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::with_tick(config.tick_interval));
    let stop = Arc::new(AtomicBool::new(false));
    let ticker = ticker::spawn(
        ToneSequencer::new(channel, ThreadDelay),
        scheduler.clone(),
        stop.clone(),
        config.tick_interval,
    )
    .context("Failed to spawn tick thread")?;

    // ── Command loop ───────────────────────────────────────────────────────
    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE);
    let result = async {
        fifo::ensure_fifo(&config.fifo).await?;
        tokio::spawn(read_pipe(config.fifo.clone(), tx.clone()));
        tokio::spawn(quit_on_signal(tx));

        CommandLoop::new(scheduler.clone(), stop.clone())
            .run(&mut rx)
            .await;
        anyhow::Ok(())
    }
    .await;

    // ── Shutdown ───────────────────────────────────────────────────────────
    stop.store(true, Ordering::Release);
    if let Some(mut channel) = ticker.shutdown_async().await {
        if let Err(e) = channel.cleanup() {
            error!("Failed to clean up PWM channel: {e}");
        }
    }

    // The schedule is not persisted; say what is being dropped.
    for entry in scheduler.pending() {
        info!(tune = %entry.tune, at = %entry.at.to_rfc3339(), "Discarding unplayed tune");
    }

    info!("Stopping the shower chime service");
    result
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shower_chime=info".into());

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .without_time()
                .with_env_filter(filter)
                .init();
        }
    }
    Ok(())
}

/// Feed the command loop from the pipe. If the pipe fails the service has no
/// input left, so ask it to quit and let the supervisor restart us.
async fn read_pipe(path: std::path::PathBuf, tx: mpsc::Sender<String>) {
    if let Err(e) = fifo::read_commands(path, tx.clone()).await {
        error!("Command pipe failed: {e:#}");
    }
    let _ = tx.send(command::QUIT.to_string()).await;
}

/// SIGINT / SIGTERM go through the same path as a `q` on the pipe.
async fn quit_on_signal(tx: mpsc::Sender<String>) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = terminate.recv() => info!("SIGTERM received"),
    }
    let _ = tx.send(command::QUIT.to_string()).await;
}
