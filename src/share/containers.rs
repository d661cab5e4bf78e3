//! Shared containers that only accept shareable elements.

use super::{is_shareable, Value};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An insertion-ordered set of shareable values.
///
/// Interior locking makes `add` available through `&self`, so the set can be
/// handed to several threads behind an `Arc` and still be shareable: every
/// element it will ever hold is checked before it is stored.
#[derive(Default)]
pub struct SharedSet {
    items: RwLock<Vec<Value>>,
}

impl SharedSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `values`, failing on the first non-shareable one.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let set = Self::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    /// Inserts `value`; returns false if an equal value was already present.
    ///
    /// Fails with `NotShareable` before touching the set if `value` is not
    /// shareable.
    pub fn add(&self, value: Value) -> Result<bool> {
        if !is_shareable(&value) {
            return Err(Error::not_shareable(value.type_name()));
        }
        let mut items = self.items.write();
        if items.contains(&value) {
            return Ok(false);
        }
        items.push(value);
        Ok(true)
    }

    /// Removes `value`; returns true if it was present.
    pub fn remove(&self, value: &Value) -> bool {
        let mut items = self.items.write();
        match items.iter().position(|item| item == value) {
            Some(pos) => {
                items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns true if an equal value is present.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.items.read().contains(value)
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Returns a snapshot of the elements in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

impl fmt::Debug for SharedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.items.read().iter()).finish()
    }
}

/// A string-keyed map of shareable values that can be frozen.
#[derive(Default)]
pub struct SharedDict {
    entries: RwLock<BTreeMap<Arc<str>, Value>>,
    frozen: AtomicBool,
}

impl SharedDict {
    /// Creates an empty, mutable dict.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::invalid_state("shareddict instance cannot be modified"));
        }
        Ok(())
    }

    /// Inserts `value` under `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<Arc<str>>, value: Value) -> Result<Option<Value>> {
        self.check_mutable()?;
        if !is_shareable(&value) {
            return Err(Error::not_shareable(value.type_name()));
        }
        let mut entries = self.entries.write();
        // Re-check under the lock so freeze() cannot race past an insert.
        self.check_mutable()?;
        Ok(entries.insert(key.into(), value))
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.write();
        self.check_mutable()?;
        Ok(entries.remove(key))
    }

    /// Returns a clone of the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the dict is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.entries.read().keys().cloned().collect()
    }

    /// Makes the dict permanently read-only.
    pub fn freeze(&self) {
        let _entries = self.entries.write();
        self.frozen.store(true, Ordering::Release);
    }

    /// Returns true once [`freeze`](Self::freeze) has been called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SharedDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.read().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::init_test_logging;

    #[test]
    fn set_rejects_list_eagerly() {
        init_test_logging();
        crate::test_phase!("set_rejects_list_eagerly");
        let set = SharedSet::new();
        set.add(Value::from(1)).unwrap();
        let err = set
            .add(Value::list([Value::from(1), Value::from(2), Value::from(3)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotShareable);
        assert_eq!(err.message(), Some("list object is not shareable"));
        assert_eq!(set.len(), 1);
        crate::test_complete!("set_rejects_list_eagerly");
    }

    #[test]
    fn set_deduplicates_and_keeps_order() {
        let set = SharedSet::from_values([Value::from("b"), Value::from("a")]).unwrap();
        assert!(!set.add(Value::from("b")).unwrap());
        assert!(set.add(Value::from("c")).unwrap());
        assert_eq!(
            set.to_vec(),
            vec![Value::from("b"), Value::from("a"), Value::from("c")]
        );
        assert!(set.remove(&Value::from("a")));
        assert!(!set.contains(&Value::from("a")));
    }

    #[test]
    fn nested_shared_set_is_shareable() {
        let inner = SharedSet::from_values([Value::from(1)]).unwrap();
        let outer = SharedSet::new();
        assert!(outer.add(Value::from(inner)).unwrap());
    }

    #[test]
    fn dict_freeze_blocks_mutation() {
        init_test_logging();
        let dict = SharedDict::new();
        dict.insert("a", Value::from(1)).unwrap();
        dict.freeze();

        let err = dict.insert("b", Value::from(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.message(), Some("shareddict instance cannot be modified"));
        assert!(dict.remove("a").is_err());
        assert_eq!(dict.get("a"), Some(Value::from(1)));
        assert_eq!(dict.keys().len(), 1);
    }

    #[test]
    fn dict_rejects_non_shareable_values() {
        let dict = SharedDict::new();
        let err = dict.insert("l", Value::list([])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotShareable);
        assert!(dict.is_empty());
    }
}
