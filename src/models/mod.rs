//! Domain updates and the model collaborators
//!
//! - `executor` - External Model Executor trait and feature rows
//! - `process` - executor backed by the python scripts
//! - `normalize` - power normalization around the scheduler

pub mod executor;
pub mod normalize;
pub mod process;

pub use executor::{FeatureRow, ModelExecutor, TrainingRow};
pub use normalize::{NormalizationMethod, Normalizer};
pub use process::ProcessExecutor;

use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamped payload flowing through the pipeline
///
/// `derived == false` means the value was supplied from outside
/// (authoritative); `true` means it was produced by inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update<T> {
    pub time: DateTime<Utc>,
    pub payload: T,
    pub metadata: Metadata,
    pub derived: bool,
}

impl<T> Update<T> {
    pub fn authoritative(time: DateTime<Utc>, payload: T, metadata: Metadata) -> Self {
        Self {
            time,
            payload,
            metadata,
            derived: false,
        }
    }

    pub fn derived(time: DateTime<Utc>, payload: T, metadata: Metadata) -> Self {
        Self {
            time,
            payload,
            metadata,
            derived: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    pub fn is_authoritative(&self) -> bool {
        !self.derived
    }
}

/// Average power produced over one slot, in Watts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Production {
    pub power: f64,
    /// Power as submitted, set while `power` holds the normalized value
    #[serde(skip)]
    pub raw_power: Option<f64>,
}

impl Production {
    pub fn new(power: f64) -> Self {
        Self { power, raw_power: None }
    }
}

/// Weather features consumed by the production model
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Weather {
    pub cloud_cover: f64,
    pub precipitation_probability: f64,
    pub precipitation_intensity: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub apparent_temperature: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub dew_point: f64,
    pub visibility: f64,
    pub uv_index: f64,
}

impl Weather {
    pub const FEATURE_COUNT: usize = 11;

    /// Features in the order the model was trained on
    pub fn features(&self) -> [f64; Self::FEATURE_COUNT] {
        [
            self.cloud_cover,
            self.precipitation_probability,
            self.wind_speed,
            self.wind_gust,
            self.precipitation_intensity,
            self.apparent_temperature,
            self.humidity,
            self.dew_point,
            self.visibility,
            self.uv_index,
            self.temperature,
        ]
    }

    /// Bitwise equality of every feature; `NaN == NaN` here, `0.0 != -0.0`.
    pub fn is_identical(&self, other: &Weather) -> bool {
        self.features()
            .iter()
            .zip(other.features().iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

pub type ProductionUpdate = Update<Production>;
pub type WeatherUpdate = Update<Weather>;
