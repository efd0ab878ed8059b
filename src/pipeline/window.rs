//! Slot buffer owned by the window scheduler
//!
//! One `WindowEntry` per rounded timestamp, created on first touch and
//! dropped by the retention sweep. Not synchronized: only the inbound
//! consumer touches it.

use crate::models::{ProductionUpdate, WeatherUpdate};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct WindowEntry {
    pub production: Option<ProductionUpdate>,
    pub weather: Option<WeatherUpdate>,
}

impl WindowEntry {
    pub fn has_authoritative_production(&self) -> bool {
        self.production
            .as_ref()
            .map_or(false, |p| p.is_authoritative())
    }

    /// Both values present and the production value is a measurement
    pub fn is_trainable(&self) -> bool {
        self.weather.is_some() && self.has_authoritative_production()
    }

    /// Store `update` if it takes precedence over the current production value
    ///
    /// Authoritative always beats derived. Within the same kind the incoming
    /// id must not be lower than the stored one.
    pub fn accept_production(&mut self, update: ProductionUpdate) -> bool {
        let accept = match &self.production {
            None => true,
            Some(current) => match (current.is_authoritative(), update.is_authoritative()) {
                (false, true) => true,
                (true, false) => false,
                _ => update.id() >= current.id(),
            },
        };
        if accept {
            self.production = Some(update);
        }
        accept
    }

    /// Store `update` unless it carries exactly the cached weather
    pub fn accept_weather(&mut self, update: WeatherUpdate) -> bool {
        if let Some(current) = &self.weather {
            if current.payload.is_identical(&update.payload) {
                return false;
            }
        }
        self.weather = Some(update);
        true
    }
}

#[derive(Debug, Default)]
pub struct WindowBuffer {
    entries: BTreeMap<DateTime<Utc>, WindowEntry>,
}

impl WindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `slot`, created empty if missing
    pub fn entry(&mut self, slot: DateTime<Utc>) -> &mut WindowEntry {
        self.entries.entry(slot).or_default()
    }

    pub fn get(&self, slot: &DateTime<Utc>) -> Option<&WindowEntry> {
        self.entries.get(slot)
    }

    pub fn get_mut(&mut self, slot: &DateTime<Utc>) -> Option<&mut WindowEntry> {
        self.entries.get_mut(slot)
    }

    /// Slot keys in chronological order
    pub fn slots(&self) -> Vec<DateTime<Utc>> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every slot at least `horizon` older than `now`; returns the count
    pub fn sweep(&mut self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|slot, _| now - *slot < horizon);
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!(
                "🧹 cleared outdated window slots: before={} after={} deleted={}",
                before,
                self.entries.len(),
                removed
            );
        }
        removed
    }
}
