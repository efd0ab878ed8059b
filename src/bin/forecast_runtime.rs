//! Forecast Runtime - JSONL adapter around the update bus
//!
//! Reads one command per line on stdin:
//!   {"kind":"production","time":1717200000,"power":2350.0}
//!   {"kind":"weather","time":1717200000,"cloudCover":0.4,"temperature":18.5}
//!
//! and writes every outbound update as one JSON line on stdout. Logs go to
//! stderr so stdout stays machine-readable.
//!
//! Usage:
//!   FORECAST_MAX_POWER=10000 cargo run --release --bin forecast_runtime < updates.jsonl
//!
//! Environment variables: see `ForecastConfig::from_env`.

use chrono::{DateTime, Utc};
use dotenv::dotenv;
use forecastflow::cache::UpdateListener;
use forecastflow::clock;
use forecastflow::models::{ModelExecutor, Production, ProductionUpdate, ProcessExecutor, Weather};
use forecastflow::{ForecastConfig, SubmitError, UpdateBus};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Command {
    Production {
        time: i64,
        power: f64,
    },
    Weather {
        time: i64,
        #[serde(flatten)]
        weather: Weather,
    },
}

#[derive(Debug, Serialize)]
struct OutboundRecord {
    time: i64,
    power: f64,
    derived: bool,
    id: u64,
}

impl From<&ProductionUpdate> for OutboundRecord {
    fn from(update: &ProductionUpdate) -> Self {
        Self {
            time: update.time.timestamp(),
            power: update.payload.power,
            derived: update.derived,
            id: update.id(),
        }
    }
}

/// Prints every outbound update to stdout
struct StdoutWriter;

impl UpdateListener for StdoutWriter {
    fn on_update(&self, update: &ProductionUpdate) {
        let line = match serde_json::to_string(&OutboundRecord::from(update)) {
            Ok(line) => line,
            Err(e) => {
                error!("❌ Failed to encode update: {}", e);
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
            error!("❌ Failed to write update: {}", e);
        }
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

async fn handle_line(bus: &UpdateBus, line: &str, timeout: Option<std::time::Duration>) {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            warn!("⚠️  Ignoring malformed line ({}): {}", e, line);
            return;
        }
    };

    let result = match command {
        Command::Production { time, power } => match timestamp(time) {
            Some(time) => bus.record_production(time, Production::new(power), timeout).await,
            None => {
                warn!("⚠️  Ignoring production update with invalid time {}", time);
                return;
            }
        },
        Command::Weather { time, weather } => match timestamp(time) {
            Some(time) => bus.record_weather(time, weather, timeout).await,
            None => {
                warn!("⚠️  Ignoring weather update with invalid time {}", time);
                return;
            }
        },
    };

    match result {
        Ok(()) => {}
        Err(SubmitError::Overloaded) => {
            warn!("⚠️  Update rejected, system is overloaded (retry later): {}", line);
        }
        Err(e) => error!("❌ Update rejected: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Forecast Runtime");

    let config = match ForecastConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("📊 Configuration:");
    info!("   ├─ Step: {}s", config.step.num_seconds());
    info!("   ├─ Batch sizes: training {}, inference {}", config.batch_size, config.inference_batch_size);
    info!("   ├─ Queue capacity: {}", config.buffer_size);
    info!("   ├─ Normalization: {}", config.normalization.as_str());
    info!("   └─ Model dir: {}", config.model_dir.display());

    let executor = ProcessExecutor::new(config.python.clone(), config.model_dir.clone());
    if let Err(e) = executor.prepare().await {
        error!("❌ Could not create production model: {}", e);
        return Err(e.into());
    }
    let executor: Arc<dyn ModelExecutor> = Arc::new(executor);

    let listeners: Vec<Arc<dyn UpdateListener>> = vec![Arc::new(StdoutWriter) as Arc<dyn UpdateListener>];
    let bus = UpdateBus::start(&config, executor, clock::system(), listeners);

    info!("🔄 Reading updates from stdin (CTRL+C to stop)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        handle_line(&bus, line, config.submit_timeout).await;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read stdin: {}", e);
                    break;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("⚠️  Received CTRL+C, shutting down...");
                break;
            }
        }
    }

    bus.shutdown().await;
    info!("✅ Forecast runtime stopped");
    Ok(())
}
