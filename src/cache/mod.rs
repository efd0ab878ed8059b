//! Read views over the outbound production stream
//!
//! - `generic` - outdating pub-sub cache every view is built on
//! - `latest` - most recent update per slot, with timestamp subscriptions
//! - `average` - seasonal average per (days ahead, hour of day)
//! - `mae` - prediction error per lead time

pub mod average;
pub mod generic;
pub mod latest;
pub mod mae;

pub use average::{AverageKind, SeasonalAverageCache};
pub use generic::{CacheElement, Callback, Observer, OutdatingCache, SubscriptionId};
pub use latest::LatestValueCache;
pub use mae::PredictionErrorCache;

use crate::models::ProductionUpdate;

/// A consumer of the outbound update stream
///
/// Called inline by the outbound consumer; implementations must not block.
pub trait UpdateListener: Send + Sync {
    fn on_update(&self, update: &ProductionUpdate);
}
