//! Outdating pub-sub cache
//!
//! Stores at most one element per key. Every write notifies matching
//! subscribers off the calling path and then sweeps the whole map, deleting
//! entries whose key the outdating predicate rejects. The sweep is O(n) per
//! write; working sets are bounded by the retention horizon (one entry per
//! slot), so a time-ordered index has not been worth it.
//!
//! Callbacks run detached (one task per notification) and may run after the
//! subscription was removed; they must not assume ordering relative to the
//! triggering `update` returning or to each other.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Anything that can live in an [`OutdatingCache`]
pub trait CacheElement: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static;

    fn key(&self) -> Self::Key;
    fn time(&self) -> DateTime<Utc>;
}

pub type Outdated<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;
pub type Observer<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;
pub type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returned when subscribing without a callback
    pub const INVALID: SubscriptionId = SubscriptionId(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

struct Subscription<E: CacheElement> {
    callback: Callback<E>,
    observed: HashSet<E::Key>,
    observers: Vec<Observer<E::Key>>,
}

impl<E: CacheElement> Subscription<E> {
    fn matches(&self, key: &E::Key) -> bool {
        self.observed.contains(key) || self.observers.iter().any(|observer| observer(key))
    }
}

pub struct OutdatingCache<E: CacheElement> {
    elements: RwLock<HashMap<E::Key, E>>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscription<E>>>,
    outdated: Outdated<E::Key>,
}

impl<E: CacheElement> OutdatingCache<E> {
    pub fn new<F>(outdated: F) -> Self
    where
        F: Fn(&E::Key) -> bool + Send + Sync + 'static,
    {
        Self {
            elements: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            outdated: Arc::new(outdated),
        }
    }

    /// Upsert `element` under its key
    pub fn update(&self, element: E) {
        self.update_with(element.key(), |_| Some(element));
    }

    /// Atomic read-modify-write of the entry at `key`
    ///
    /// `f` sees the current element (if any) and returns the replacement, or
    /// `None` to leave the entry untouched. Only a replacement notifies
    /// subscribers. The sweep runs either way. Returns the stored element.
    pub fn update_with<F>(&self, key: E::Key, f: F) -> Option<E>
    where
        F: FnOnce(Option<&E>) -> Option<E>,
    {
        let stored = {
            let mut elements = self.elements.write().unwrap_or_else(|e| e.into_inner());
            let next = f(elements.get(&key));
            if let Some(ref element) = next {
                debug_assert_eq!(element.key(), key);
                elements.insert(key.clone(), element.clone());
            }
            next
        };

        if let Some(ref element) = stored {
            self.notify(&key, element);
        }

        self.sweep();
        stored
    }

    /// Current element for `key`, without side effects
    pub fn get(&self, key: &E::Key) -> Option<E> {
        self.elements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.elements.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `callback` for updates whose key is in `observed` or accepted
    /// by any of `observers`, and replay matching cached elements once.
    ///
    /// A subscription with neither filter never fires and is dropped on the
    /// next write.
    pub fn subscribe(
        &self,
        callback: Option<Callback<E>>,
        observed: impl IntoIterator<Item = E::Key>,
        observers: Vec<Observer<E::Key>>,
    ) -> SubscriptionId {
        let Some(callback) = callback else {
            return SubscriptionId::INVALID;
        };

        let subscription = Subscription {
            callback: callback.clone(),
            observed: observed.into_iter().collect(),
            observers,
        };

        let replay: Vec<E> = {
            let elements = self.elements.read().unwrap_or_else(|e| e.into_inner());
            elements
                .iter()
                .filter(|(key, _)| !(self.outdated)(key) && subscription.matches(key))
                .map(|(_, element)| element.clone())
                .collect()
        };

        let id = {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            let mut id = SubscriptionId(rand::random());
            while !id.is_valid() || subscribers.contains_key(&id) {
                id = SubscriptionId(rand::random());
            }
            subscribers.insert(id, subscription);
            id
        };

        if !replay.is_empty() {
            detach(move || {
                for element in replay {
                    callback(element);
                }
            });
        }

        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify(&self, key: &E::Key, element: &E) {
        if (self.outdated)(key) {
            return;
        }

        let callbacks: Vec<Callback<E>> = {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            let outdated = &self.outdated;
            subscribers.retain(|id, subscription| {
                subscription.observed.retain(|observed| !outdated(observed));
                let expired = subscription.observed.is_empty() && subscription.observers.is_empty();
                if expired {
                    log::trace!("subscription {:?} expired", id);
                }
                !expired
            });
            subscribers
                .values()
                .filter(|subscription| subscription.matches(key))
                .map(|subscription| subscription.callback.clone())
                .collect()
        };

        for callback in callbacks {
            let element = element.clone();
            detach(move || callback(element));
        }
    }

    fn sweep(&self) {
        let mut elements = self.elements.write().unwrap_or_else(|e| e.into_inner());
        let before = elements.len();
        elements.retain(|key, _| !(self.outdated)(key));
        if before > elements.len() {
            log::trace!("swept {} outdated cache entries", before - elements.len());
        }
    }
}

/// Run a callback off the calling path, on the current runtime if there is one
fn detach<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}
