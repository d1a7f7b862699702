//! # Asset Tracker
//!
//! Telemetry agent for a cellular/GPS asset tracker.
//!
//! Reports the asset's position to a collector over GT06 or HTTP/JSON,
//! buffering while the link is down and sleeping while the asset is idle.
//!
//! # Usage
//!
//! ```bash
//! asset-tracker [config/tracker.toml]
//! ```
//!
//! Commands are read from stdin, one per line (`STATUS`, `INTERVAL,30`,
//! `SERVER,GT06,host,port`, ...). Ctrl+C shuts down.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use asset_tracker::battery::{run_battery_loop, BatteryMonitor, BatteryStatus, SysfsBattery};
use asset_tracker::command::{parse_console_line, Command};
use asset_tracker::config::{ConfigStore, FileConfigStore, LoggingConfig};
use asset_tracker::indicator::{spawn_ticker, Lamp, LampOutput, StatusIndicator, TracingLamp};
use asset_tracker::location::sources::{NullFixSource, NullWifiScanner, ReplayFixSource};
use asset_tracker::location::PositionSource;
use asset_tracker::tracker::{Exit, Tracker};

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/tracker.toml";

/// Pending commands before senders wait
const COMMAND_QUEUE: usize = 16;

/// Set up console logging, plus a daily log file when `logging.dir` is set
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes the
/// file writer and must live as long as the process.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "asset-tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Read operator commands from stdin on a plain thread
///
/// A blocking stdin read would otherwise hold up runtime shutdown.
fn spawn_console(commands: mpsc::Sender<Command>) {
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            };

            let request = match parse_console_line(&line) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            if commands.blocking_send(request.command).is_err() {
                break;
            }

            if let Some(reply) = request.reply {
                if let Ok(status) = reply.blocking_recv() {
                    println!("{}", status);
                }
            }
        }
        debug!("Console closed");
    });
}

/// Build one tracker instance with its battery loop and run it
async fn run_tracker(
    store: Arc<FileConfigStore>,
    indicator: StatusIndicator,
    commands: &mut mpsc::Receiver<Command>,
    cancel: CancellationToken,
) -> Result<Exit> {
    let config = store.get();

    let gps: Box<dyn PositionSource> = match &config.gps.replay_file {
        Some(path) => {
            let step = Duration::from_secs(config.tracker.update_interval_s);
            let source = ReplayFixSource::load(path, step)
                .with_context(|| format!("Failed to load fixes from {}", path.display()))?;
            Box::new(source)
        }
        None => {
            warn!("No fix source configured, running without satellite positions");
            Box::new(NullFixSource)
        }
    };

    let (battery_tx, battery_rx) = watch::channel(BatteryStatus::default());
    let tracker = Tracker::from_store(
        store.clone(),
        gps,
        Box::new(NullWifiScanner),
        indicator.clone(),
        battery_rx,
    )?;

    let monitor = BatteryMonitor::new(Box::new(SysfsBattery::new(&config.battery.power_supply_dir)));
    let battery = tokio::spawn(run_battery_loop(
        monitor,
        Duration::from_secs(config.battery.poll_interval_s),
        config.battery.low_percent,
        indicator,
        tracker.subscribe_power(),
        battery_tx,
        cancel.clone(),
    ));

    let exit = tracker.run(commands, cancel.clone()).await;

    cancel.cancel();
    battery.await?;
    Ok(exit)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let store = Arc::new(
        FileConfigStore::open(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?,
    );
    let config = store.get();
    let _log_guard = init_tracing(&config.logging);

    info!("Asset Tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", store.path().display());

    let shutdown = CancellationToken::new();
    let indicator = StatusIndicator::new();
    let outputs: [Box<dyn LampOutput>; 3] =
        Lamp::ALL.map(|lamp| Box::new(TracingLamp::new(lamp)) as Box<dyn LampOutput>);
    let ticker = spawn_ticker(
        indicator.clone(),
        outputs,
        Duration::from_millis(config.indicator.tick_ms),
        shutdown.clone(),
    );

    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_QUEUE);
    spawn_console(command_tx);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            signal.cancel();
        }
    });

    loop {
        let exit = run_tracker(
            store.clone(),
            indicator.clone(),
            &mut command_rx,
            shutdown.child_token(),
        )
        .await?;

        match exit {
            Exit::Reset => info!("Restarting tracker"),
            Exit::PowerOff => {
                info!("Powering off");
                break;
            }
            Exit::Shutdown => break,
        }
    }

    shutdown.cancel();
    ticker.await?;
    Ok(())
}
