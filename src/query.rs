//! Outbound query surface
//!
//! Read-only view over the derived caches, plus timestamp subscriptions on
//! the latest-value cache. Power values are in W, energy in kWh.

use crate::cache::latest::UpdateCallback;
use crate::cache::{AverageKind, LatestValueCache, PredictionErrorCache, SeasonalAverageCache, SubscriptionId};
use crate::clock::Clock;
use crate::error::QueryError;
use crate::models::ProductionUpdate;
use crate::timeline::start_of_day;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const HOURS_PER_DAY: u32 = 24;

#[derive(Clone)]
pub struct ProductionQuery {
    latest: Arc<LatestValueCache>,
    averages: Arc<SeasonalAverageCache>,
    errors: Arc<PredictionErrorCache>,
    clock: Arc<dyn Clock>,
    accuracy: Duration,
}

impl ProductionQuery {
    pub fn new(
        latest: Arc<LatestValueCache>,
        averages: Arc<SeasonalAverageCache>,
        errors: Arc<PredictionErrorCache>,
        clock: Arc<dyn Clock>,
        accuracy: Duration,
    ) -> Self {
        Self {
            latest,
            averages,
            errors,
            clock,
            accuracy,
        }
    }

    /// Latest update for the slot containing `at`
    pub fn at(&self, at: DateTime<Utc>) -> Option<ProductionUpdate> {
        self.latest.get(at)
    }

    /// Power at `at` in W
    pub fn power(&self, at: DateTime<Utc>) -> Option<f64> {
        self.at(at).map(|u| u.payload.power)
    }

    /// Energy produced in `[from, to]`, in kWh
    ///
    /// Power is sampled every `accuracy` starting at `from`; the mean sample
    /// times the interval length is the result. A single missing sample fails
    /// the whole query.
    pub fn integrate(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<f64, QueryError> {
        if from > to {
            return Err(QueryError::IllegalRange);
        }

        let mut sum = 0.0;
        let mut count = 0u32;
        let mut at = from;
        while at <= to {
            sum += self.power(at).ok_or(QueryError::NoData)?;
            count += 1;
            at = at + self.accuracy;
        }

        let average = sum / count as f64;
        let hours = (to - from).num_seconds() as f64 / 3600.0;
        Ok(average / 1000.0 * hours)
    }

    /// Hourly power of the UTC day containing `at`
    pub fn day(&self, at: DateTime<Utc>) -> Vec<Option<f64>> {
        let start = start_of_day(at);
        (0..HOURS_PER_DAY as i64)
            .map(|h| self.power(start + Duration::hours(h)))
            .collect()
    }

    /// Hourly power of the day `days` from today
    pub fn day_relative(&self, days: i64) -> Vec<Option<f64>> {
        self.day(self.clock.now() + Duration::days(days))
    }

    pub fn seasonal(&self, days_ahead: u32, hour: u32, kind: AverageKind) -> Option<f64> {
        self.averages.get(days_ahead, hour, kind)
    }

    /// Seasonal averages for every hour of one `days_ahead` bucket row
    pub fn seasonal_day(&self, days_ahead: u32, kind: AverageKind) -> Vec<Option<f64>> {
        (0..HOURS_PER_DAY)
            .map(|hour| self.averages.get(days_ahead, hour, kind))
            .collect()
    }

    /// Seasonal averages for the UTC day containing `at`
    pub fn seasonal_day_at(&self, at: DateTime<Utc>, kind: AverageKind) -> Vec<Option<f64>> {
        let days_ahead = (start_of_day(at) - self.clock.now()).num_days().max(0) as u32;
        self.seasonal_day(days_ahead, kind)
    }

    pub fn mae(&self, lead: Duration) -> Option<f64> {
        self.errors.mae(lead)
    }

    pub fn mae_series(&self) -> Vec<f64> {
        self.errors.mae_series().into_iter().map(|(_, mae)| mae).collect()
    }

    /// Watch absolute slots and/or slots at a fixed offset from now
    pub fn subscribe(
        &self,
        callback: Option<UpdateCallback>,
        absolute: &[DateTime<Utc>],
        relative: &[Duration],
    ) -> SubscriptionId {
        self.latest.subscribe(callback, absolute, relative)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.latest.unsubscribe(id)
    }

    /// Live subscriptions; expired ones are dropped on the next update
    pub fn subscription_count(&self) -> usize {
        self.latest.subscriber_count()
    }
}
