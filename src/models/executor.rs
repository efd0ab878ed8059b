//! External Model Executor interface
//!
//! The scheduler only sees this narrow train/infer surface, so its decisions
//! can be exercised with a scripted fake instead of the real model.

use crate::error::ExecutorError;
use crate::models::Weather;
use crate::timeline::{day_fraction, year_fraction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One time step as seen by the model: cyclic time encoding plus weather
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub time: DateTime<Utc>,
    pub year_fraction: f64,
    pub day_fraction: f64,
    pub features: Vec<f64>,
}

impl FeatureRow {
    pub fn new(time: DateTime<Utc>, weather: &Weather) -> Self {
        Self {
            time,
            year_fraction: year_fraction(time),
            day_fraction: day_fraction(time),
            features: weather.features().to_vec(),
        }
    }

    /// Flat input vector: `[year, day, features...]`
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.features.len() + 2);
        values.push(self.year_fraction);
        values.push(self.day_fraction);
        values.extend_from_slice(&self.features);
        values
    }
}

/// A feature row with its normalized production target
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub input: FeatureRow,
    pub target: f64,
}

#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Train on rows in chronological order
    async fn train(&self, rows: &[TrainingRow]) -> Result<(), ExecutorError>;

    /// One prediction per row, in row order
    async fn infer(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ExecutorError>;
}
