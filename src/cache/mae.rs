//! Prediction-error cache
//!
//! Derived updates are remembered per slot and lead time. When the
//! authoritative value of a slot arrives, every remembered prediction is
//! scored against it and folded into the mean absolute error of its lead time.

use super::generic::{CacheElement, OutdatingCache};
use super::UpdateListener;
use crate::average::DecayingAverage;
use crate::clock::Clock;
use crate::models::ProductionUpdate;
use crate::timeline::round;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct Predictions {
    slot: DateTime<Utc>,
    by_lead: HashMap<Duration, f64>,
}

impl CacheElement for Predictions {
    type Key = DateTime<Utc>;

    fn key(&self) -> DateTime<Utc> {
        self.slot
    }

    fn time(&self) -> DateTime<Utc> {
        self.slot
    }
}

pub struct PredictionErrorCache {
    predictions: OutdatingCache<Predictions>,
    errors: RwLock<HashMap<Duration, DecayingAverage>>,
    /// Latest time an authoritative value was seen for
    completed: Arc<RwLock<Option<DateTime<Utc>>>>,
    half_life: f64,
    step: Duration,
    clock: Arc<dyn Clock>,
}

impl PredictionErrorCache {
    pub fn new(half_life: f64, step: Duration, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        let completed: Arc<RwLock<Option<DateTime<Utc>>>> = Arc::new(RwLock::new(None));
        let horizon = completed.clone();
        Self {
            predictions: OutdatingCache::new(move |slot: &DateTime<Utc>| {
                match *horizon.read().unwrap_or_else(|e| e.into_inner()) {
                    Some(completed) => completed - *slot >= retention,
                    None => false,
                }
            }),
            errors: RwLock::new(HashMap::new()),
            completed,
            half_life,
            step,
            clock,
        }
    }

    pub fn record(&self, update: &ProductionUpdate) {
        let slot = round(update.time, self.step);

        if update.derived {
            let lead = slot - round(self.clock.now(), self.step);
            let power = update.payload.power;
            log::trace!("remembering prediction for {} at lead {}", slot, lead);
            self.predictions.update_with(slot, |current| {
                let mut predictions = current.cloned().unwrap_or_else(|| Predictions {
                    slot,
                    by_lead: HashMap::new(),
                });
                predictions.by_lead.insert(lead, power);
                Some(predictions)
            });
            return;
        }

        if let Some(predictions) = self.predictions.get(&slot) {
            let actual = update.payload.power;
            let mut errors = self.errors.write().unwrap_or_else(|e| e.into_inner());
            for (lead, predicted) in &predictions.by_lead {
                let mae = errors
                    .entry(*lead)
                    .or_insert_with(|| DecayingAverage::mae(self.half_life));
                mae.apply(&[actual, *predicted]);
                log::debug!("production error {} ahead: {:.3}", lead, mae.get());
            }
        }

        let mut completed = self.completed.write().unwrap_or_else(|e| e.into_inner());
        if completed.map_or(true, |c| c < update.time) {
            *completed = Some(update.time);
        }
    }

    /// Mean absolute error of predictions made `lead` ahead of their slot
    pub fn mae(&self, lead: Duration) -> Option<f64> {
        self.errors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&lead)
            .map(|mae| mae.get())
    }

    /// MAE for leads `step, 2*step, ...` up to the first lead without data
    pub fn mae_series(&self) -> Vec<(Duration, f64)> {
        let errors = self.errors.read().unwrap_or_else(|e| e.into_inner());
        let mut series = Vec::new();
        let mut lead = self.step;
        while let Some(mae) = errors.get(&lead) {
            series.push((lead, mae.get()));
            lead = lead + self.step;
        }
        series
    }

    /// Latest authoritative time seen so far
    pub fn completed(&self) -> Option<DateTime<Utc>> {
        *self.completed.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pending_slots(&self) -> usize {
        self.predictions.len()
    }
}

impl UpdateListener for PredictionErrorCache {
    fn on_update(&self, update: &ProductionUpdate) {
        self.record(update);
    }
}
