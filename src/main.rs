//! lumen-agent - edge agent for LED strip and audio state
//!
//! Keeps the device's actuators synchronized with the desired state
//! held by the hub, and reports the actually-rendered state back.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audio;
mod config;
mod engine;
mod error;
mod hub;
mod led;
mod report;
mod session;
mod state;

use crate::audio::AudioActuator;
use crate::config::AgentConfig;
use crate::engine::{Reconciler, Trigger};
use crate::hub::HubClient;
use crate::led::strip::open_strip;
use crate::led::LedActuator;
use crate::report::Reporter;
use crate::state::StateStore;

/// Lumen edge agent - sync LED strip and audio with the hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Force the software strip even when hardware is configured
    #[arg(long)]
    no_hardware: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting lumen-agent...");
    info!("Configuration file: {}", args.config);

    let config = AgentConfig::load(&args.config).await?;
    info!(
        "Agent for device '{}' against hub {}",
        config.hub.device_id, config.hub.url
    );

    run_agent(config, args.no_hardware, shutdown_signal()).await?;

    info!("lumen-agent shutdown complete");
    Ok(())
}

async fn run_agent(
    config: AgentConfig,
    no_hardware: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let store = StateStore::new();
    let leds = LedActuator::new(open_strip(&config.leds, no_hardware));
    let audio = AudioActuator::new(&config.audio, store.clone());
    let hub = HubClient::new(&config.hub);

    let (trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(64);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reporter = Reporter::new(
        config.hub.device_id.clone(),
        Duration::from_secs(config.timers.report_min_interval_secs),
        outbound_tx.clone(),
    );
    let engine = Reconciler::new(
        &config,
        store,
        leds,
        audio,
        reporter,
        hub.clone(),
        outbound_tx,
    );
    let engine_handle = tokio::spawn(engine.run(trigger_rx));

    // Session: connect-forever loop feeding lifecycle and inbound
    // command triggers
    let session_handle = tokio::spawn(session::run_session(
        config.clone(),
        trigger_tx.clone(),
        outbound_rx,
    ));

    // Independent timers, all funneled into the single trigger channel
    let heartbeat_handle = tokio::spawn(ticker(
        Duration::from_secs(config.timers.heartbeat_secs),
        trigger_tx.clone(),
        || Trigger::Heartbeat,
    ));
    let watch_handle = tokio::spawn(ticker(
        Duration::from_secs(config.timers.watch_secs),
        trigger_tx.clone(),
        || Trigger::Watch,
    ));
    let poll_handle = tokio::spawn(poll_ticker(
        Duration::from_secs(config.timers.poll_secs),
        hub,
        trigger_tx.clone(),
    ));

    info!("Agent running, waiting for triggers");
    shutdown.await;

    info!("Shutting down...");
    // Defensive de-lit before exit; the engine processes it in order
    // after any in-flight cycle.
    if trigger_tx.send(Trigger::Disconnected).await.is_err() {
        warn!("Engine already stopped");
    }

    session_handle.abort();
    heartbeat_handle.abort();
    watch_handle.abort();
    poll_handle.abort();
    drop(trigger_tx);

    engine_handle.await?;
    Ok(())
}

/// Fixed-period trigger source
async fn ticker(
    period: Duration,
    tx: mpsc::Sender<Trigger>,
    make: impl Fn() -> Trigger,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick; connect handles initial sync
    interval.tick().await;
    loop {
        interval.tick().await;
        if tx.send(make()).await.is_err() {
            return;
        }
    }
}

/// Periodic hub poll: fetch the stored desired state, then let the
/// engine decide whether anything needs applying
async fn poll_ticker(period: Duration, hub: HubClient, tx: mpsc::Sender<Trigger>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;
    loop {
        interval.tick().await;
        match hub.fetch_desired_state().await {
            Ok(Some(desired)) => {
                if tx.send(Trigger::Poll(desired)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Poll fetch failed: {}", e);
            }
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
