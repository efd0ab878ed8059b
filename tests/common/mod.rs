//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use forecastflow::cache::UpdateListener;
use forecastflow::clock::MockClock;
use forecastflow::models::{FeatureRow, ModelExecutor, ProductionUpdate, TrainingRow};
use forecastflow::{ExecutorError, ForecastConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub fn hour(h: i64) -> DateTime<Utc> {
    t0() + Duration::hours(h)
}

pub fn clock() -> MockClock {
    MockClock::new(t0())
}

/// Hourly config with 1 kW installed power and the given batch sizes
pub fn config(batch_size: usize, inference_batch_size: usize, buffer_size: usize) -> ForecastConfig {
    config_with(batch_size, inference_batch_size, buffer_size, &[])
}

/// Like [`config`], with extra variables overriding the defaults
pub fn config_with(
    batch_size: usize,
    inference_batch_size: usize,
    buffer_size: usize,
    extra: &[(&'static str, &str)],
) -> ForecastConfig {
    let mut vars = HashMap::new();
    vars.insert("FORECAST_MAX_POWER", "1000".to_string());
    vars.insert("FORECAST_BATCH_SIZE", batch_size.to_string());
    vars.insert("FORECAST_INFERENCE_BATCH_SIZE", inference_batch_size.to_string());
    vars.insert("FORECAST_BUFFER_SIZE", buffer_size.to_string());
    vars.insert("FORECAST_LATEST_MAX_AGE_SECS", (24 * 3600).to_string());
    for (key, value) in extra {
        vars.insert(*key, value.to_string());
    }
    ForecastConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Executor with a fixed normalized prediction that counts its calls
///
/// With `gated`, every inference reports that it started and then waits for
/// a permit on `gate`.
pub struct FakeExecutor {
    pub prediction: f64,
    pub trainings: AtomicUsize,
    pub inferences: AtomicUsize,
    pub gate: Option<Arc<Semaphore>>,
    pub entered: Option<mpsc::UnboundedSender<()>>,
}

impl FakeExecutor {
    pub fn new(prediction: f64) -> Self {
        Self {
            prediction,
            trainings: AtomicUsize::new(0),
            inferences: AtomicUsize::new(0),
            gate: None,
            entered: None,
        }
    }

    pub fn gated(prediction: f64) -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<()>) {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Self {
            gate: Some(gate.clone()),
            entered: Some(tx),
            ..Self::new(prediction)
        };
        (executor, gate, rx)
    }

    pub fn training_calls(&self) -> usize {
        self.trainings.load(Ordering::SeqCst)
    }

    pub fn inference_calls(&self) -> usize {
        self.inferences.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelExecutor for FakeExecutor {
    async fn train(&self, _rows: &[TrainingRow]) -> Result<(), ExecutorError> {
        self.trainings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn infer(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ExecutorError> {
        self.inferences.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            let _ = entered.send(());
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(vec![self.prediction; rows.len()])
    }
}

/// Forwards every outbound update into a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ProductionUpdate>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProductionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl UpdateListener for ChannelListener {
    fn on_update(&self, update: &ProductionUpdate) {
        let _ = self.tx.send(update.clone());
    }
}

/// Next outbound update, failing the test after one second
pub async fn next_update(rx: &mut mpsc::UnboundedReceiver<ProductionUpdate>) -> ProductionUpdate {
    tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for an outbound update")
        .expect("outbound stream closed")
}
