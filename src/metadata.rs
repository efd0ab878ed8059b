//! Update metadata and id assignment
//!
//! Ids, not timestamps, decide precedence between competing values for the
//! same slot: the update processed last carries the highest id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: u64,
    /// When the update was received by this system
    pub arrival_time: DateTime<Utc>,
}

impl Metadata {
    pub fn new(id: u64, arrival_time: DateTime<Utc>) -> Self {
        Self { id, arrival_time }
    }

    /// Combine two metadata values; the larger id wins, ties keep `self`.
    pub fn latest(self, other: Metadata) -> Metadata {
        if other.id > self.id {
            other
        } else {
            self
        }
    }
}

/// Latest of a non-empty sequence, first element winning ties
pub fn latest<I>(first: Metadata, others: I) -> Metadata
where
    I: IntoIterator<Item = Metadata>,
{
    others.into_iter().fold(first, Metadata::latest)
}

/// Source of strictly increasing ids
///
/// Holding the guard while enqueuing keeps queue order equal to id order.
#[derive(Debug)]
pub struct IdSequence {
    next: Mutex<u64>,
}

impl IdSequence {
    /// Ids start at 1 so the very first update outranks the initial model (id 0).
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }

    pub async fn lock(&self) -> IdGuard<'_> {
        IdGuard {
            next: self.next.lock().await,
        }
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IdGuard<'a> {
    next: MutexGuard<'a, u64>,
}

impl IdGuard<'_> {
    /// Consume the next id
    pub fn attach(&mut self, arrival_time: DateTime<Utc>) -> Metadata {
        let meta = Metadata::new(*self.next, arrival_time);
        *self.next += 1;
        meta
    }
}
