//! Update stream bus
//!
//! Owns the bounded inbound queues, the outbound queue and the two consumer
//! tasks, plus the derived caches fed from the outbound side. Submitters get
//! `SubmitError::Overloaded` when a queue stays full for their timeout;
//! nothing is ever dropped silently.

use super::ingestion::{run_inbound, run_outbound};
use super::scheduler::WindowScheduler;
use crate::cache::{LatestValueCache, PredictionErrorCache, SeasonalAverageCache, UpdateListener};
use crate::clock::Clock;
use crate::config::ForecastConfig;
use crate::error::SubmitError;
use crate::metadata::{IdSequence, Metadata};
use crate::models::{
    ModelExecutor, NormalizationMethod, Normalizer, Production, ProductionUpdate, Update, Weather, WeatherUpdate,
};
use crate::query::ProductionQuery;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;

pub struct UpdateBus {
    production_tx: mpsc::Sender<ProductionUpdate>,
    weather_tx: mpsc::Sender<WeatherUpdate>,
    ids: IdSequence,
    clock: Arc<dyn Clock>,
    latest: Arc<LatestValueCache>,
    averages: Arc<SeasonalAverageCache>,
    errors: Arc<PredictionErrorCache>,
    integration_accuracy: chrono::Duration,
    inbound: JoinHandle<WindowScheduler>,
    outbound: JoinHandle<()>,
}

impl UpdateBus {
    /// Build the caches and spawn both consumers on the current runtime
    ///
    /// `listeners` receive every outbound update after the derived caches.
    pub fn start(
        config: &ForecastConfig,
        executor: Arc<dyn ModelExecutor>,
        clock: Arc<dyn Clock>,
        listeners: Vec<Arc<dyn UpdateListener>>,
    ) -> Self {
        let latest = Arc::new(LatestValueCache::new(config.step, config.latest_max_age, clock.clone()));
        let averages = Arc::new(SeasonalAverageCache::new(
            config.average_half_life,
            config.step,
            clock.clone(),
        ));
        let errors = Arc::new(PredictionErrorCache::new(
            config.error_half_life,
            config.step,
            config.error_retention,
            clock.clone(),
        ));

        let normalizer = match config.normalization {
            NormalizationMethod::MaxPower => Normalizer::MaxPower(config.max_power),
            NormalizationMethod::AverageDay => Normalizer::AverageDay(averages.clone()),
        };

        let (production_tx, production_rx) = mpsc::channel(config.buffer_size);
        let (weather_tx, weather_rx) = mpsc::channel(config.buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.buffer_size);

        let scheduler = WindowScheduler::new(config.scheduler_settings(), executor, clock.clone(), outbound_tx);

        let mut fan_out: Vec<Arc<dyn UpdateListener>> = Vec::with_capacity(listeners.len() + 3);
        fan_out.push(latest.clone());
        fan_out.push(averages.clone());
        fan_out.push(errors.clone());
        fan_out.extend(listeners);

        let inbound = tokio::spawn(run_inbound(production_rx, weather_rx, scheduler, normalizer.clone()));
        let outbound = tokio::spawn(run_outbound(outbound_rx, normalizer, fan_out));

        log::info!("✅ Update bus started (queue capacity: {})", config.buffer_size);

        Self {
            production_tx,
            weather_tx,
            ids: IdSequence::new(),
            clock,
            latest,
            averages,
            errors,
            integration_accuracy: config.integration_accuracy,
            inbound,
            outbound,
        }
    }

    /// Enqueue a production update; `None` waits for space indefinitely
    pub async fn submit_production(
        &self,
        update: ProductionUpdate,
        timeout: Option<Duration>,
    ) -> Result<(), SubmitError> {
        submit(&self.production_tx, update, timeout, "production").await
    }

    /// Enqueue a weather update; `None` waits for space indefinitely
    pub async fn submit_weather(&self, update: WeatherUpdate, timeout: Option<Duration>) -> Result<(), SubmitError> {
        submit(&self.weather_tx, update, timeout, "weather").await
    }

    /// Stamp a measurement with the next id and enqueue it
    ///
    /// The id lock is held until the update is queued, so queue order
    /// matches id order across concurrent callers.
    pub async fn record_production(
        &self,
        time: DateTime<Utc>,
        production: Production,
        timeout: Option<Duration>,
    ) -> Result<(), SubmitError> {
        let mut ids = self.ids.lock().await;
        let metadata = ids.attach(self.clock.now());
        self.submit_production(Update::authoritative(time, production, metadata), timeout)
            .await
    }

    /// Stamp a weather observation with the next id and enqueue it
    pub async fn record_weather(
        &self,
        time: DateTime<Utc>,
        weather: Weather,
        timeout: Option<Duration>,
    ) -> Result<(), SubmitError> {
        let mut ids = self.ids.lock().await;
        let metadata = ids.attach(self.clock.now());
        self.submit_weather(Update::authoritative(time, weather, metadata), timeout)
            .await
    }

    /// Read surface over the derived caches
    pub fn query(&self) -> ProductionQuery {
        ProductionQuery::new(
            self.latest.clone(),
            self.averages.clone(),
            self.errors.clone(),
            self.clock.clone(),
            self.integration_accuracy,
        )
    }

    /// Close the inbound queues and wait for both consumers to drain
    ///
    /// Returns the final model version, or `None` if the inbound consumer panicked.
    pub async fn shutdown(self) -> Option<Metadata> {
        let UpdateBus {
            production_tx,
            weather_tx,
            inbound,
            outbound,
            ..
        } = self;
        drop(production_tx);
        drop(weather_tx);

        // dropping the scheduler closes the outbound queue
        let model = match inbound.await {
            Ok(scheduler) => Some(scheduler.model()),
            Err(e) => {
                log::error!("❌ Inbound consumer failed: {}", e);
                None
            }
        };

        if let Err(e) = outbound.await {
            log::error!("❌ Outbound consumer failed: {}", e);
        }
        log::info!("✅ Update bus stopped (model id: {:?})", model.map(|m| m.id));
        model
    }
}

async fn submit<T>(
    tx: &mpsc::Sender<T>,
    update: T,
    timeout: Option<Duration>,
    kind: &str,
) -> Result<(), SubmitError> {
    match timeout {
        Some(timeout) => tx.send_timeout(update, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => {
                log::warn!("⚠️  {} queue full for {:?}, rejecting update", kind, timeout);
                SubmitError::Overloaded
            }
            SendTimeoutError::Closed(_) => SubmitError::Closed,
        }),
        None => tx.send(update).await.map_err(|_| SubmitError::Closed),
    }
}
