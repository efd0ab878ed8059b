//! Forecastflow - window scheduling and caching for a power-production forecaster
//!
//! Two out-of-order streams (metered production, weather) are aligned into
//! fixed-width slots. The window scheduler decides when the model is trained
//! and which slots get a prediction; results flow through the outbound
//! queue into read-optimized caches.

pub mod average;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod timeline;

pub use config::ForecastConfig;
pub use error::{ConfigError, ExecutorError, QueryError, SubmitError};
pub use pipeline::UpdateBus;
pub use query::ProductionQuery;
