//! Maps with weakly held keys or values.

use super::queue::{DeathQueue, WatchHandle};
use super::tracked::{Tracked, WeakRef};
use crate::error::{Error, ErrorKind, Result};
use crate::types::ObjectId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::fmt;

fn key_not_found() -> Error {
    Error::new(ErrorKind::KeyNotFound).with_message("key not in weak map")
}

struct KeyEntry<K, V> {
    key: WeakRef<K>,
    value: V,
    watch: WatchHandle,
}

type KeyEntries<K, V> = BTreeMap<ObjectId, KeyEntry<K, V>>;

/// A map whose entries disappear when their key object dies.
///
/// Keys are compared by identity. Values are owned by the map.
pub struct WeakKeyMap<K, V> {
    entries: Mutex<KeyEntries<K, V>>,
    deaths: DeathQueue<ObjectId>,
}

impl<K: Send + Sync + 'static, V> WeakKeyMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            deaths: DeathQueue::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, KeyEntries<K, V>> {
        let mut entries = self.entries.lock();
        while let Some((handle, id)) = self.deaths.pop() {
            if entries.get(&id).is_some_and(|e| e.watch == handle) {
                entries.remove(&id);
            }
        }
        entries
    }

    /// Inserts or replaces the value for `key`; returns the old value.
    pub fn insert(&self, key: &Tracked<K>, value: V) -> Option<V> {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&key.id()) {
            return Some(std::mem::replace(&mut entry.value, value));
        }
        let watch = self.deaths.watch(key, key.id());
        entries.insert(
            key.id(),
            KeyEntry {
                key: key.downgrade(),
                value,
                watch,
            },
        );
        None
    }

    /// Removes the entry for `key`, failing with `KeyNotFound` if absent.
    pub fn remove(&self, key: &Tracked<K>) -> Result<V> {
        let removed = self.entries().remove(&key.id()).ok_or_else(key_not_found)?;
        self.deaths.unwatch(removed.watch);
        Ok(removed.value)
    }

    /// Returns true if `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: &Tracked<K>) -> bool {
        self.entries().contains_key(&key.id())
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        // A key may be dead before its death reaches the queue.
        self.entries().values().filter(|e| e.key.is_alive()).count()
    }

    /// Returns true if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<Tracked<K>> {
        self.entries()
            .values()
            .filter_map(|e| e.key.upgrade())
            .collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries());
        for entry in entries.into_values() {
            self.deaths.unwatch(entry.watch);
        }
    }

    /// Removes and returns an arbitrary live entry.
    pub fn pop_item(&self) -> Option<(Tracked<K>, V)> {
        let mut entries = self.entries();
        while let Some((_, entry)) = entries.pop_first() {
            self.deaths.unwatch(entry.watch);
            if let Some(key) = entry.key.upgrade() {
                return Some((key, entry.value));
            }
        }
        None
    }
}

impl<K: Send + Sync + 'static, V: Clone> WeakKeyMap<K, V> {
    /// Returns a clone of the value for `key`.
    #[must_use]
    pub fn get(&self, key: &Tracked<K>) -> Option<V> {
        self.entries().get(&key.id()).map(|e| e.value.clone())
    }

    /// Returns clones of the live values.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        self.entries()
            .values()
            .filter(|e| e.key.is_alive())
            .map(|e| e.value.clone())
            .collect()
    }

    /// Returns the live entries.
    #[must_use]
    pub fn items(&self) -> Vec<(Tracked<K>, V)> {
        self.entries()
            .values()
            .filter_map(|e| e.key.upgrade().map(|k| (k, e.value.clone())))
            .collect()
    }
}

impl<K: Send + Sync + 'static, V> Default for WeakKeyMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for WeakKeyMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakKeyMap")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

struct ValueEntry<V> {
    value: WeakRef<V>,
    watch: WatchHandle,
}

type ValueEntries<K, V> = BTreeMap<K, ValueEntry<V>>;

/// A map whose entries disappear when their value object dies.
pub struct WeakValueMap<K, V> {
    entries: Mutex<ValueEntries<K, V>>,
    deaths: DeathQueue<K>,
}

impl<K, V> WeakValueMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            deaths: DeathQueue::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, ValueEntries<K, V>> {
        let mut entries = self.entries.lock();
        while let Some((handle, key)) = self.deaths.pop() {
            if entries.get(&key).is_some_and(|e| e.watch == handle) {
                entries.remove(&key);
            }
        }
        entries
    }

    /// Maps `key` to `value`; returns the previous value if still alive.
    ///
    /// Overwriting cancels the previous value's watch, so its later death
    /// cannot evict the new entry.
    pub fn insert(&self, key: K, value: &Tracked<V>) -> Option<Tracked<V>> {
        let mut entries = self.entries();
        let watch = self.deaths.watch(value, key.clone());
        let previous = entries.insert(
            key,
            ValueEntry {
                value: value.downgrade(),
                watch,
            },
        );
        previous.and_then(|old| {
            self.deaths.unwatch(old.watch);
            old.value.upgrade()
        })
    }

    /// Returns the value for `key` if it is still alive.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Tracked<V>> {
        self.entries().get(key).and_then(|e| e.value.upgrade())
    }

    /// Removes the entry for `key`, failing with `KeyNotFound` if absent or
    /// dead.
    pub fn remove(&self, key: &K) -> Result<Tracked<V>> {
        let removed = self.entries().remove(key).ok_or_else(key_not_found)?;
        self.deaths.unwatch(removed.watch);
        removed.value.upgrade().ok_or_else(key_not_found)
    }

    /// Returns true if `key` maps to a live value.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries().get(key).is_some_and(|e| e.value.is_alive())
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        // A value may be dead before its death reaches the queue.
        self.entries().values().filter(|e| e.value.is_alive()).count()
    }

    /// Returns true if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the keys of live entries, in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.entries()
            .iter()
            .filter(|(_, e)| e.value.is_alive())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Returns the live values, in key order.
    #[must_use]
    pub fn values(&self) -> Vec<Tracked<V>> {
        self.entries()
            .values()
            .filter_map(|e| e.value.upgrade())
            .collect()
    }

    /// Returns the live entries, in key order.
    #[must_use]
    pub fn items(&self) -> Vec<(K, Tracked<V>)> {
        self.entries()
            .iter()
            .filter_map(|(k, e)| e.value.upgrade().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries());
        for entry in entries.into_values() {
            self.deaths.unwatch(entry.watch);
        }
    }

    /// Removes and returns the first live entry.
    pub fn pop_item(&self) -> Option<(K, Tracked<V>)> {
        let mut entries = self.entries();
        while let Some((key, entry)) = entries.pop_first() {
            self.deaths.unwatch(entry.watch);
            if let Some(value) = entry.value.upgrade() {
                return Some((key, value));
            }
        }
        None
    }
}

impl<K, V> Default for WeakValueMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for WeakValueMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("WeakValueMap")
            .field("keys", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
