//! A set of weakly held objects.

use super::queue::{DeathQueue, WatchHandle};
use super::tracked::{Tracked, WeakRef};
use crate::error::{Error, ErrorKind, Result};
use crate::types::ObjectId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::fmt;

struct Member<T> {
    target: WeakRef<T>,
    watch: WatchHandle,
}

type Members<T> = BTreeMap<ObjectId, Member<T>>;

/// A set that does not keep its members alive.
///
/// Members disappear once the last strong handle elsewhere is dropped.
/// Iteration order is object creation order.
pub struct WeakSet<T> {
    members: Mutex<Members<T>>,
    deaths: DeathQueue<ObjectId>,
}

impl<T: Send + Sync + 'static> WeakSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
            deaths: DeathQueue::new(),
        }
    }

    /// Locks the members after dropping entries whose objects died.
    fn members(&self) -> MutexGuard<'_, Members<T>> {
        let mut members = self.members.lock();
        while let Some((handle, id)) = self.deaths.pop() {
            if members.get(&id).is_some_and(|m| m.watch == handle) {
                members.remove(&id);
            }
        }
        members
    }

    /// Adds `item`; returns false if it was already present.
    pub fn add(&self, item: &Tracked<T>) -> bool {
        let mut members = self.members();
        if members.contains_key(&item.id()) {
            return false;
        }
        let watch = self.deaths.watch(item, item.id());
        members.insert(
            item.id(),
            Member {
                target: item.downgrade(),
                watch,
            },
        );
        true
    }

    /// Removes `item`, failing with `KeyNotFound` if absent.
    pub fn remove(&self, item: &Tracked<T>) -> Result<()> {
        if self.discard(item) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::KeyNotFound).with_message("item not in weak set"))
        }
    }

    /// Removes `item` if present; returns whether it was.
    pub fn discard(&self, item: &Tracked<T>) -> bool {
        let removed = self.members().remove(&item.id());
        removed.map_or(false, |member| {
            self.deaths.unwatch(member.watch);
            true
        })
    }

    /// Returns true if `item` is a member.
    #[must_use]
    pub fn contains(&self, item: &Tracked<T>) -> bool {
        self.members().contains_key(&item.id())
    }

    /// Returns the number of live members.
    #[must_use]
    pub fn len(&self) -> usize {
        // A member may be dead before its death reaches the queue.
        self.members().values().filter(|m| m.target.is_alive()).count()
    }

    /// Returns true if there are no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns strong handles to the live members.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Tracked<T>> {
        self.members()
            .values()
            .filter_map(|m| m.target.upgrade())
            .collect()
    }

    /// Iterates over a snapshot of the live members.
    pub fn iter(&self) -> impl Iterator<Item = Tracked<T>> {
        self.to_vec().into_iter()
    }

    /// Removes every member.
    pub fn clear(&self) {
        let members = std::mem::take(&mut *self.members());
        for member in members.into_values() {
            self.deaths.unwatch(member.watch);
        }
    }

    /// Removes and returns an arbitrary live member.
    pub fn pop(&self) -> Option<Tracked<T>> {
        let mut members = self.members();
        while let Some((_, member)) = members.pop_first() {
            self.deaths.unwatch(member.watch);
            if let Some(item) = member.target.upgrade() {
                return Some(item);
            }
        }
        None
    }

    fn from_items(items: impl IntoIterator<Item = Tracked<T>>) -> Self {
        let set = Self::new();
        for item in items {
            set.add(&item);
        }
        set
    }

    /// Members of either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_items(self.iter().chain(other.iter()))
    }

    /// Members of both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self::from_items(self.iter().filter(|item| other.contains(item)))
    }

    /// Members of `self` not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self::from_items(self.iter().filter(|item| !other.contains(item)))
    }

    /// Members of exactly one of the sets.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        let left = self.iter().filter(|item| !other.contains(item));
        let right: Vec<_> = other.iter().filter(|item| !self.contains(item)).collect();
        Self::from_items(left.chain(right))
    }

    /// Returns true if every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.iter().all(|item| other.contains(&item))
    }

    /// Returns true if every member of `other` is in `self`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }
}

impl<T: Send + Sync + 'static> Default for WeakSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WeakSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.lock();
        f.debug_set().entries(members.keys()).finish()
    }
}
