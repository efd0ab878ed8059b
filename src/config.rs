//! Forecast configuration from environment variables
//!
//! Every value has a default. Values that are present but unparsable or out
//! of range are `ConfigError::InvalidValue`, which the runtime treats as fatal.

use crate::error::ConfigError;
use crate::models::NormalizationMethod;
use crate::pipeline::scheduler::SchedulerSettings;
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound for both batch sizes; runs are indexed with `i32` slot counts
const MAX_BATCH_SIZE: usize = 100_000;
const MAX_BATCH_EXPECTED: &str = "1 to 100000 slots (0 allowed for training)";

/// Configuration for the forecasting pipeline
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Slot width
    pub step: Duration,

    /// Slots per training run, 0 disables training
    pub batch_size: usize,

    /// Slots per inference run
    pub inference_batch_size: usize,

    /// Capacity of each bounded queue
    pub buffer_size: usize,

    /// How long submitters wait for queue space; `None` blocks
    pub submit_timeout: Option<std::time::Duration>,

    pub normalization: NormalizationMethod,

    /// Installed peak power in W, used by `maxpower` normalization
    pub max_power: f64,

    pub average_half_life: f64,
    pub error_half_life: f64,

    /// Age after which the latest-value cache forgets a slot
    pub latest_max_age: Duration,

    /// How far behind the latest measurement predictions are kept for scoring
    pub error_retention: Duration,

    /// Sampling distance of range integration
    pub integration_accuracy: Duration,

    pub python: String,
    pub model_dir: PathBuf,
}

impl ForecastConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FORECAST_STEP_SECS` (default: 3600)
    /// - `FORECAST_BATCH_SIZE` (default: 24)
    /// - `FORECAST_INFERENCE_BATCH_SIZE` (default: 24)
    /// - `FORECAST_BUFFER_SIZE` (default: 100)
    /// - `FORECAST_SUBMIT_TIMEOUT_MS` (default: 5000, 0 blocks)
    /// - `FORECAST_NORMALIZATION` (default: maxpower)
    /// - `FORECAST_MAX_POWER` (required > 0 for maxpower)
    /// - `FORECAST_AVERAGE_HALF_LIFE` / `FORECAST_ERROR_HALF_LIFE` (default: 720)
    /// - `FORECAST_LATEST_MAX_AGE_SECS` / `FORECAST_ERROR_RETENTION_SECS` (default: step)
    /// - `FORECAST_INTEGRATION_ACCURACY_SECS` (default: 300)
    /// - `FORECAST_PYTHON` (default: python3)
    /// - `FORECAST_MODEL_DIR` (default: ./python)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let step = seconds(&lookup, "FORECAST_STEP_SECS", Duration::hours(1))?;

        let batch_size: usize = parse(&lookup, "FORECAST_BATCH_SIZE", 24, "a slot count")?;
        if batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid("FORECAST_BATCH_SIZE", MAX_BATCH_EXPECTED, batch_size));
        }
        let inference_batch_size: usize =
            parse(&lookup, "FORECAST_INFERENCE_BATCH_SIZE", 24, "a slot count")?;
        if inference_batch_size == 0 || inference_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "FORECAST_INFERENCE_BATCH_SIZE",
                MAX_BATCH_EXPECTED,
                inference_batch_size,
            ));
        }
        // the scheduler keeps slots for step * largest batch
        if step.checked_mul(batch_size.max(inference_batch_size) as i32).is_none() {
            return Err(ConfigError::invalid(
                "FORECAST_STEP_SECS",
                "a step whose multiple by the batch size fits a duration",
                step.num_seconds(),
            ));
        }

        let buffer_size: usize = parse(&lookup, "FORECAST_BUFFER_SIZE", 100, "a queue capacity")?;
        if buffer_size == 0 {
            return Err(ConfigError::invalid("FORECAST_BUFFER_SIZE", "at least 1", buffer_size));
        }

        let timeout_ms: u64 = parse(&lookup, "FORECAST_SUBMIT_TIMEOUT_MS", 5000, "milliseconds")?;
        let submit_timeout = (timeout_ms > 0).then(|| std::time::Duration::from_millis(timeout_ms));

        let normalization = match lookup("FORECAST_NORMALIZATION") {
            Some(raw) => raw.parse::<NormalizationMethod>()?,
            None => NormalizationMethod::MaxPower,
        };
        let max_power: f64 = parse(&lookup, "FORECAST_MAX_POWER", 0.0, "watts")?;
        if normalization == NormalizationMethod::MaxPower && !(max_power > 0.0) {
            return Err(ConfigError::invalid(
                "FORECAST_MAX_POWER",
                "(0, +inf) watts for maxpower normalization",
                max_power,
            ));
        }

        let average_half_life = half_life(&lookup, "FORECAST_AVERAGE_HALF_LIFE")?;
        let error_half_life = half_life(&lookup, "FORECAST_ERROR_HALF_LIFE")?;

        let latest_max_age = seconds(&lookup, "FORECAST_LATEST_MAX_AGE_SECS", step)?;
        let error_retention = seconds(&lookup, "FORECAST_ERROR_RETENTION_SECS", step)?;
        let integration_accuracy =
            seconds(&lookup, "FORECAST_INTEGRATION_ACCURACY_SECS", Duration::minutes(5))?;

        let python = lookup("FORECAST_PYTHON").unwrap_or_else(|| "python3".to_string());
        let model_dir = PathBuf::from(lookup("FORECAST_MODEL_DIR").unwrap_or_else(|| "./python".to_string()));

        Ok(Self {
            step,
            batch_size,
            inference_batch_size,
            buffer_size,
            submit_timeout,
            normalization,
            max_power,
            average_half_life,
            error_half_life,
            latest_max_age,
            error_retention,
            integration_accuracy,
            python,
            model_dir,
        })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            step: self.step,
            batch_size: self.batch_size,
            inference_batch_size: self.inference_batch_size,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T, expected: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, expected, raw)),
        None => Ok(default),
    }
}

fn half_life<F>(lookup: &F, key: &str) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse(lookup, key, 720.0, "a number of samples")?;
    if !(value > 0.0) || !value.is_finite() {
        return Err(ConfigError::invalid(key, "(0, +inf) samples", value));
    }
    Ok(value)
}

fn seconds<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: i64 = parse(lookup, key, default.num_seconds(), "a number of seconds")?;
    if secs <= 0 {
        return Err(ConfigError::invalid(key, "(0, +inf) seconds", secs));
    }
    Duration::try_seconds(secs).ok_or_else(|| ConfigError::invalid(key, "a representable number of seconds", secs))
}
