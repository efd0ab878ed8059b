//! Window scheduler
//!
//! Aligns production and weather updates into slots and decides when the
//! model is trained and when a slot gets a prediction. Owned and driven by
//! the inbound consumer only, so none of this state is locked.
//!
//! After every accepted update the whole buffer is scanned in chronological
//! order. A successful training changes the model version, which can make
//! other slots due, so the scan then restarts from the earliest slot. The
//! scan stops once a full pass fires no training.

use super::window::{WindowBuffer, WindowEntry};
use crate::clock::Clock;
use crate::error::ExecutorError;
use crate::metadata::{self, Metadata};
use crate::models::{FeatureRow, ModelExecutor, Production, ProductionUpdate, TrainingRow, Update, WeatherUpdate};
use crate::timeline::{is_gapless, round};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub step: Duration,
    /// Slots per training run; 0 disables training
    pub batch_size: usize,
    /// Slots per inference run, at least 1
    pub inference_batch_size: usize,
}

impl SchedulerSettings {
    /// Slots this old are no longer part of any run
    pub fn retention(&self) -> Duration {
        self.step * self.batch_size.max(self.inference_batch_size) as i32
    }
}

/// What one applied update caused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub accepted: bool,
    pub trainings: usize,
    pub inferences: usize,
}

pub struct WindowScheduler {
    window: WindowBuffer,
    model: Metadata,
    settings: SchedulerSettings,
    executor: Arc<dyn ModelExecutor>,
    clock: Arc<dyn Clock>,
    outbound: mpsc::Sender<ProductionUpdate>,
}

impl WindowScheduler {
    pub fn new(
        settings: SchedulerSettings,
        executor: Arc<dyn ModelExecutor>,
        clock: Arc<dyn Clock>,
        outbound: mpsc::Sender<ProductionUpdate>,
    ) -> Self {
        let model = Metadata::new(0, clock.now());
        Self {
            window: WindowBuffer::new(),
            model,
            settings,
            executor,
            clock,
            outbound,
        }
    }

    /// Current model version
    pub fn model(&self) -> Metadata {
        self.model
    }

    pub fn window(&self) -> &WindowBuffer {
        &self.window
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub async fn apply_production(&mut self, update: ProductionUpdate) -> ScanOutcome {
        self.sweep();
        let slot = round(update.time, self.settings.step);
        log::debug!("received production update id={} slot={}", update.id(), slot);

        if !self.window.entry(slot).accept_production(update.clone()) {
            log::trace!("dropped superseded production update id={} slot={}", update.id(), slot);
            return ScanOutcome::default();
        }

        if update.is_authoritative() {
            self.publish(update).await;
        }

        let mut outcome = self.scan().await;
        outcome.accepted = true;
        outcome
    }

    pub async fn apply_weather(&mut self, update: WeatherUpdate) -> ScanOutcome {
        self.sweep();
        let slot = round(update.time, self.settings.step);
        log::trace!("received weather update id={} slot={}", update.id(), slot);

        if !self.window.entry(slot).accept_weather(update) {
            log::trace!("dropped duplicate weather update for {}", slot);
            return ScanOutcome::default();
        }

        let mut outcome = self.scan().await;
        outcome.accepted = true;
        outcome
    }

    fn sweep(&mut self) {
        let now = self.clock.now();
        self.window.sweep(now, self.settings.retention());
    }

    async fn scan(&mut self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        // one failure per kind is enough for this update; the next update retries
        let mut training_failed = false;
        let mut inference_failed = false;

        'scan: loop {
            let slots = self.window.slots();
            log::trace!("scanning {} slots (model id={})", slots.len(), self.model.id);

            for i in 0..slots.len() {
                if !training_failed {
                    if let Some(run) = self.training_run(&slots, i) {
                        match self.train(run).await {
                            Ok(version) => {
                                log::debug!(
                                    "✅ updated production model id={} (run starts {})",
                                    version.id,
                                    slots[i]
                                );
                                self.model = version;
                                outcome.trainings += 1;
                                continue 'scan;
                            }
                            Err(e) => {
                                log::error!("❌ training on production model failed: {}", e);
                                training_failed = true;
                            }
                        }
                    }
                }

                if !inference_failed {
                    if let Some(run) = self.inference_run(&slots, i) {
                        match self.infer(run).await {
                            Ok(written) => {
                                log::debug!("predicted {} production values from {}", written, slots[i]);
                                outcome.inferences += 1;
                            }
                            Err(e) => {
                                log::error!("❌ inference on production model failed: {}", e);
                                inference_failed = true;
                            }
                        }
                    }
                }
            }

            return outcome;
        }
    }

    /// The run starting at `slots[i]` if it can train the model
    fn training_run<'a>(&self, slots: &'a [DateTime<Utc>], i: usize) -> Option<&'a [DateTime<Utc>]> {
        let batch = self.settings.batch_size;
        if batch == 0 {
            return None;
        }

        let entry = self.window.get(&slots[i])?;
        let production = entry.production.as_ref()?;
        if production.id() <= self.model.id {
            return None;
        }

        let run = self.gapless_run(slots, i, batch)?;
        if run.iter().all(|slot| self.window.get(slot).map_or(false, WindowEntry::is_trainable)) {
            log::trace!("slot {} triggers training", slots[i]);
            Some(run)
        } else {
            None
        }
    }

    /// The run starting at `slots[i]` if `slots[i]` needs a prediction
    fn inference_run<'a>(&self, slots: &'a [DateTime<Utc>], i: usize) -> Option<&'a [DateTime<Utc>]> {
        let entry = self.window.get(&slots[i])?;
        if !self.needs_prediction(entry) {
            return None;
        }

        let run = self.gapless_run(slots, i, self.settings.inference_batch_size)?;
        if run
            .iter()
            .all(|slot| self.window.get(slot).map_or(false, |e| e.weather.is_some()))
        {
            log::trace!("slot {} can be predicted", slots[i]);
            Some(run)
        } else {
            None
        }
    }

    /// No value yet, or a derived value made by an older model or from older weather
    fn needs_prediction(&self, entry: &WindowEntry) -> bool {
        match &entry.production {
            None => true,
            Some(p) if p.is_authoritative() => false,
            Some(p) => {
                p.id() < self.model.id
                    || entry.weather.as_ref().map_or(false, |w| p.id() < w.id())
            }
        }
    }

    fn gapless_run<'a>(&self, slots: &'a [DateTime<Utc>], start: usize, len: usize) -> Option<&'a [DateTime<Utc>]> {
        if len == 0 {
            return None;
        }
        let end = start + len - 1;
        if is_gapless(slots, start, end, self.settings.step) {
            Some(&slots[start..=end])
        } else {
            None
        }
    }

    /// Train on `run`; returns the model version it produces
    async fn train(&self, run: &[DateTime<Utc>]) -> Result<Metadata, ExecutorError> {
        let mut rows = Vec::with_capacity(run.len());
        let mut version = self.model;

        for slot in run {
            let entry = self.window.get(slot);
            let (Some(production), Some(weather)) = (
                entry.and_then(|e| e.production.as_ref()),
                entry.and_then(|e| e.weather.as_ref()),
            ) else {
                continue;
            };
            version = metadata::latest(version, [weather.metadata, production.metadata]);
            rows.push(TrainingRow {
                input: FeatureRow::new(*slot, &weather.payload),
                target: production.payload.power,
            });
        }

        log::debug!("starting training on {} slots from {}", rows.len(), run[0]);
        self.executor.train(&rows).await?;
        Ok(version)
    }

    /// Predict `run` and write the results; returns how many slots took a value
    async fn infer(&mut self, run: &[DateTime<Utc>]) -> Result<usize, ExecutorError> {
        let rows: Vec<FeatureRow> = run
            .iter()
            .filter_map(|slot| {
                let weather = self.window.get(slot)?.weather.as_ref()?;
                Some(FeatureRow::new(*slot, &weather.payload))
            })
            .collect();

        log::debug!("starting inference on {} slots from {}", rows.len(), run[0]);
        let predictions = self.executor.infer(&rows).await?;
        if predictions.len() != rows.len() {
            return Err(ExecutorError::ShapeMismatch {
                expected: rows.len(),
                actual: predictions.len(),
            });
        }

        let mut written = 0;
        for (row, power) in rows.iter().zip(predictions) {
            let Some(entry) = self.window.get_mut(&row.time) else {
                continue;
            };
            let Some(weather_meta) = entry.weather.as_ref().map(|w| w.metadata) else {
                continue;
            };
            let update = Update::derived(row.time, Production::new(power), self.model.latest(weather_meta));
            if entry.accept_production(update.clone()) {
                written += 1;
                self.publish(update).await;
            }
        }
        Ok(written)
    }

    async fn publish(&self, update: ProductionUpdate) {
        log::trace!(
            "sending update id={} time={} derived={} into outgoing channel",
            update.id(),
            update.time,
            update.derived
        );
        if self.outbound.send(update).await.is_err() {
            log::warn!("⚠️  outbound channel closed, dropping update");
        }
    }
}
