//! Latest-value cache
//!
//! Holds the most recent production update per slot. A derived value never
//! replaces an authoritative one. Slots expire `max_age` after their start.

use super::generic::{CacheElement, Callback, Observer, OutdatingCache, SubscriptionId};
use super::UpdateListener;
use crate::clock::Clock;
use crate::models::ProductionUpdate;
use crate::timeline::round;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct SlotValue {
    slot: DateTime<Utc>,
    update: ProductionUpdate,
}

impl CacheElement for SlotValue {
    type Key = DateTime<Utc>;

    fn key(&self) -> DateTime<Utc> {
        self.slot
    }

    fn time(&self) -> DateTime<Utc> {
        self.update.time
    }
}

pub type UpdateCallback = Arc<dyn Fn(ProductionUpdate) + Send + Sync>;

pub struct LatestValueCache {
    slots: OutdatingCache<SlotValue>,
    step: Duration,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl LatestValueCache {
    pub fn new(step: Duration, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.clone();
        Self {
            slots: OutdatingCache::new(move |slot: &DateTime<Utc>| now.now() - *slot >= max_age),
            step,
            max_age,
            clock,
        }
    }

    pub fn record(&self, update: &ProductionUpdate) {
        let slot = round(update.time, self.step);
        self.slots.update_with(slot, |current| match current {
            Some(previous) if previous.update.is_authoritative() && update.derived => {
                log::trace!("keeping authoritative value for {}", slot);
                None
            }
            _ => Some(SlotValue {
                slot,
                update: update.clone(),
            }),
        });
    }

    /// Latest update for the slot containing `at`
    pub fn get(&self, at: DateTime<Utc>) -> Option<ProductionUpdate> {
        self.slots.get(&round(at, self.step)).map(|value| value.update)
    }

    /// Watch absolute slots and/or slots relative to the current time
    ///
    /// The callback is replayed with cached matches, then called on every
    /// matching update. The subscription ends once all absolute slots have
    /// expired and no relative durations remain. Relative durations that can
    /// never match a live slot are dropped.
    pub fn subscribe(
        &self,
        callback: Option<UpdateCallback>,
        absolute: &[DateTime<Utc>],
        relative: &[Duration],
    ) -> SubscriptionId {
        let Some(callback) = callback else {
            return SubscriptionId::INVALID;
        };

        let step = self.step;
        let observed: Vec<DateTime<Utc>> = absolute.iter().map(|t| round(*t, step)).collect();
        let observers: Vec<Observer<DateTime<Utc>>> = relative
            .iter()
            .filter(|d| **d > -self.max_age)
            .map(|d| {
                let offset = *d;
                let clock = self.clock.clone();
                let observer: Observer<DateTime<Utc>> =
                    Arc::new(move |slot: &DateTime<Utc>| round(clock.now() + offset, step) == *slot);
                observer
            })
            .collect();

        let forward: Callback<SlotValue> = Arc::new(move |value: SlotValue| callback(value.update));
        self.slots.subscribe(Some(forward), observed, observers)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.slots.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.subscriber_count()
    }

    pub fn step(&self) -> Duration {
        self.step
    }
}

impl UpdateListener for LatestValueCache {
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
    use tokio::sync::mpsc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn cache() -> (LatestValueCache, MockClock) {
        let clock = MockClock::new(start());
        let cache = LatestValueCache::new(Duration::hours(1), Duration::hours(1), Arc::new(clock.clone()));
        (cache, clock)
    }

    fn authoritative(time: DateTime<Utc>, power: f64, id: u64) -> ProductionUpdate {
        Update::authoritative(time, Production::new(power), Metadata::new(id, start()))
    }

    fn derived(time: DateTime<Utc>, power: f64, id: u64) -> ProductionUpdate {
        Update::derived(time, Production::new(power), Metadata::new(id, start()))
    }

    #[test]
    fn test_lookup_rounds_to_slot() {
        let (cache, _) = cache();
        let t = start() + Duration::minutes(90);
        cache.record(&authoritative(t, 500.0, 1));
        assert_eq!(cache.get(start() + Duration::minutes(61)).unwrap().payload.power, 500.0);
        assert!(cache.get(start()).is_none());
    }

    #[test]
    fn test_derived_never_replaces_authoritative() {
        let (cache, _) = cache();
        let t = start() + Duration::hours(2);
        cache.record(&authoritative(t, 500.0, 1));
        cache.record(&derived(t, 300.0, 9));
        let got = cache.get(t).unwrap();
        assert!(got.is_authoritative());
        assert_eq!(got.payload.power, 500.0);

        cache.record(&authoritative(t, 550.0, 10));
        assert_eq!(cache.get(t).unwrap().payload.power, 550.0);
    }

    #[test]
    fn test_derived_replaces_derived() {
        let (cache, _) = cache();
        let t = start() + Duration::hours(2);
        cache.record(&derived(t, 300.0, 2));
        cache.record(&derived(t, 310.0, 3));
        assert_eq!(cache.get(t).unwrap().payload.power, 310.0);
    }

    #[test]
    fn test_slots_expire_with_age() {
        let (cache, clock) = cache();
        cache.record(&authoritative(start(), 100.0, 1));
        clock.advance(Duration::minutes(59));
        cache.record(&authoritative(start() + Duration::hours(1), 200.0, 2));
        assert!(cache.get(start()).is_some());

        clock.advance(Duration::minutes(1));
        cache.record(&authoritative(start() + Duration::hours(1), 210.0, 3));
        assert!(cache.get(start()).is_none());
    }

    #[tokio::test]
    async fn test_relative_subscription_follows_clock() {
        let (cache, _) = cache();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: UpdateCallback = Arc::new(move |u| {
            let _ = tx.send(u);
        });
        let id = cache.subscribe(Some(callback), &[], &[Duration::hours(1)]);
        assert!(id.is_valid());

        cache.record(&derived(start() + Duration::hours(2), 1.0, 1));
        cache.record(&derived(start() + Duration::hours(1), 2.0, 2));

        let got = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload.power, 2.0);
    }

    #[test]
    fn test_hopeless_relative_duration_is_dropped() {
        let (cache, _) = cache();
        let callback: UpdateCallback = Arc::new(|_| {});
        cache.subscribe(Some(callback), &[], &[Duration::hours(-2)]);
        // no filters remain, so the next write prunes it
        cache.record(&authoritative(start(), 1.0, 1));
        assert_eq!(cache.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_without_callback() {
        let (cache, _) = cache();
        assert_eq!(cache.subscribe(None, &[start()], &[]), SubscriptionId::INVALID);
    }
}
