//! Copy-on-write containers.
//!
//! Delivery reads a snapshot with a single atomic load and never blocks on
//! a writer. Registration is rare, so every mutation clones the whole
//! collection and swaps it in.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use meshd_event::{matches_handler, same_handler, HandlerRef};

/// The handlers registered for one event kind.
pub struct HandlerRegistry<E: 'static> {
    handlers: ArcSwap<Vec<HandlerRef<E>>>,
}

impl<E: 'static> HandlerRegistry<E> {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add(&self, handler: HandlerRef<E>) {
        self.handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(handler.clone());
            next
        });
    }

    /// Removes every entry that is `handler` or wraps it. Returns how many
    /// entries were removed.
    pub fn remove(&self, handler: &HandlerRef<E>) -> usize {
        let previous = self.handlers.rcu(|current| {
            current
                .iter()
                .filter(|candidate| !matches_handler(candidate, handler))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous
            .iter()
            .filter(|candidate| matches_handler(candidate, handler))
            .count()
    }

    /// Returns `true` if exactly this entry is still registered.
    pub fn contains(&self, handler: &HandlerRef<E>) -> bool {
        self.handlers
            .load()
            .iter()
            .any(|candidate| same_handler(candidate, handler))
    }

    /// The handlers registered at the time of the call.
    pub fn snapshot(&self) -> Arc<Vec<HandlerRef<E>>> {
        self.handlers.load_full()
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }
}

impl<E: 'static> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A string-keyed map with the same read/write profile.
pub struct CopyOnWriteMap<V> {
    entries: ArcSwap<BTreeMap<String, V>>,
}

impl<V: Clone> CopyOnWriteMap<V> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }

    pub fn put(&self, key: &str, value: V) {
        self.entries.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(key.to_string(), value.clone());
            next
        });
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.load().get(key).cloned()
    }

    pub fn snapshot(&self) -> Arc<BTreeMap<String, V>> {
        self.entries.load_full()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.load().keys().cloned().collect()
    }
}

impl<V: Clone> Default for CopyOnWriteMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
