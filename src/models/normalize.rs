//! Power normalization applied around the window scheduler
//!
//! Production values enter the scheduler normalized and leave it
//! denormalized. The mapping is a pure function of the configured method;
//! for `AverageDay` it reads the authoritative seasonal baseline of the
//! slot's hour.

use crate::cache::average::{AverageKind, SeasonalAverageCache};
use crate::error::ConfigError;
use chrono::{DateTime, Timelike, Utc};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationMethod {
    MaxPower,
    AverageDay,
}

impl NormalizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationMethod::MaxPower => "maxpower",
            NormalizationMethod::AverageDay => "averageday",
        }
    }
}

impl FromStr for NormalizationMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "maxpower" => Ok(NormalizationMethod::MaxPower),
            "averageday" => Ok(NormalizationMethod::AverageDay),
            other => Err(ConfigError::invalid(
                "FORECAST_NORMALIZATION",
                "one of: maxpower, averageday",
                other,
            )),
        }
    }
}

#[derive(Clone)]
pub enum Normalizer {
    /// Divide by the installed peak power
    MaxPower(f64),
    /// Divide by the average authoritative power of the same hour
    AverageDay(Arc<SeasonalAverageCache>),
}

impl Normalizer {
    pub fn normalize(&self, power: f64, at: DateTime<Utc>) -> f64 {
        power / self.scale(at)
    }

    pub fn denormalize(&self, power: f64, at: DateTime<Utc>) -> f64 {
        power * self.scale(at)
    }

    fn scale(&self, at: DateTime<Utc>) -> f64 {
        match self {
            Normalizer::MaxPower(max) => *max,
            Normalizer::AverageDay(averages) => averages
                .get(0, at.hour(), AverageKind::Authoritative)
                .filter(|v| *v != 0.0)
                .unwrap_or(1.0),
        }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalizer::MaxPower(max) => write!(f, "MaxPower({})", max),
            Normalizer::AverageDay(_) => write!(f, "AverageDay"),
        }
    }
}
