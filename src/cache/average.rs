//! Seasonal-average cache
//!
//! One bucket per `(days_ahead, hour_of_day)`, each holding a decaying
//! average of authoritative and one of derived power. Buckets are never
//! evicted: there are at most `24 * horizon_days` of them.

use super::generic::{CacheElement, OutdatingCache};
use super::UpdateListener;
use crate::average::DecayingAverage;
use crate::clock::Clock;
use crate::models::ProductionUpdate;
use crate::timeline::round;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageKind {
    Authoritative,
    Derived,
}

#[derive(Debug, Clone)]
pub struct SeasonalBucket {
    pub days_ahead: u32,
    pub hour: u32,
    authoritative: DecayingAverage,
    derived: DecayingAverage,
    updated: DateTime<Utc>,
}

impl SeasonalBucket {
    fn new(days_ahead: u32, hour: u32, half_life: f64, now: DateTime<Utc>) -> Self {
        Self {
            days_ahead,
            hour,
            authoritative: DecayingAverage::sum(half_life),
            derived: DecayingAverage::sum(half_life),
            updated: now,
        }
    }

    fn average(&self, kind: AverageKind) -> &DecayingAverage {
        match kind {
            AverageKind::Authoritative => &self.authoritative,
            AverageKind::Derived => &self.derived,
        }
    }
}

impl CacheElement for SeasonalBucket {
    type Key = (u32, u32);

    fn key(&self) -> (u32, u32) {
        (self.days_ahead, self.hour)
    }

    fn time(&self) -> DateTime<Utc> {
        self.updated
    }
}

pub struct SeasonalAverageCache {
    buckets: OutdatingCache<SeasonalBucket>,
    half_life: f64,
    step: Duration,
    clock: Arc<dyn Clock>,
}

impl SeasonalAverageCache {
    pub fn new(half_life: f64, step: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: OutdatingCache::new(|_| false),
            half_life,
            step,
            clock,
        }
    }

    /// Bucket key of a slot as seen from now
    ///
    /// Slots in the past count as today.
    pub fn bucket_of(&self, time: DateTime<Utc>) -> (u32, u32) {
        let now = self.clock.now();
        let distance = round(time, self.step) - round(now, self.step);
        let days_ahead = distance.num_days().max(0) as u32;
        (days_ahead, time.hour())
    }

    pub fn record(&self, update: &ProductionUpdate) {
        let key = self.bucket_of(update.time);
        let now = self.clock.now();
        let half_life = self.half_life;
        let power = update.payload.power;

        self.buckets.update_with(key, |current| {
            let mut bucket = current
                .cloned()
                .unwrap_or_else(|| SeasonalBucket::new(key.0, key.1, half_life, now));
            if update.derived {
                bucket.derived.apply(&[power]);
            } else {
                bucket.authoritative.apply(&[power]);
            }
            bucket.updated = now;
            Some(bucket)
        });
    }

    /// Average of `kind` for the bucket, `None` if no sample of that kind was seen
    pub fn get(&self, days_ahead: u32, hour: u32, kind: AverageKind) -> Option<f64> {
        let bucket = self.buckets.get(&(days_ahead, hour))?;
        let average = bucket.average(kind);
        if average.is_empty() {
            return None;
        }
        Some(average.get())
    }
}

impl UpdateListener for SeasonalAverageCache {
    fn on_update(&self, update: &ProductionUpdate) {
        self.record(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::metadata::Metadata;
    use crate::models::{Production, Update};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
    }

    fn cache() -> SeasonalAverageCache {
        SeasonalAverageCache::new(720.0, Duration::hours(1), Arc::new(MockClock::new(now())))
    }

    fn update(time: DateTime<Utc>, power: f64, derived: bool) -> ProductionUpdate {
        let meta = Metadata::new(1, now());
        if derived {
            Update::derived(time, Production::new(power), meta)
        } else {
            Update::authoritative(time, Production::new(power), meta)
        }
    }

    #[test]
    fn test_bucket_days_ahead() {
        let cache = cache();
        assert_eq!(cache.bucket_of(now()), (0, 8));
        assert_eq!(cache.bucket_of(now() + Duration::hours(23)), (0, 7));
        assert_eq!(cache.bucket_of(now() + Duration::hours(24)), (1, 8));
        assert_eq!(cache.bucket_of(now() + Duration::hours(50)), (2, 10));
        // past slots fold into today
        assert_eq!(cache.bucket_of(now() - Duration::hours(30)), (0, 2));
    }

    #[test]
    fn test_kinds_are_tracked_separately() {
        let cache = cache();
        let t = now() + Duration::hours(2);
        cache.record(&update(t, 100.0, false));
        cache.record(&update(t, 300.0, true));

        assert_eq!(cache.get(0, 10, AverageKind::Authoritative), Some(100.0));
        assert_eq!(cache.get(0, 10, AverageKind::Derived), Some(300.0));
        assert_eq!(cache.get(0, 11, AverageKind::Authoritative), None);
    }

    #[test]
    fn test_missing_kind_is_none() {
        let cache = cache();
        cache.record(&update(now(), 50.0, true));
        assert_eq!(cache.get(0, 8, AverageKind::Authoritative), None);
        assert_eq!(cache.get(0, 8, AverageKind::Derived), Some(50.0));
    }

    #[test]
    fn test_samples_accumulate() {
        let cache = cache();
        for power in [100.0, 200.0] {
            cache.record(&update(now(), power, false));
        }
        let avg = cache.get(0, 8, AverageKind::Authoritative).unwrap();
        assert!(avg > 100.0 && avg < 200.0);
    }
}
