//! Weak references, the death queue and weak collections.
//!
//! [`Tracked<T>`] is a strong handle with a stable identity;
//! [`WeakRef<T>`] observes it without keeping it alive. Death hooks registered
//! against a tracked object run on whichever thread drops the last strong
//! handle, so they do bounded, lock-free work only: a [`DeathQueue`] watch
//! pushes an index onto a `SegQueue`, and a finalizer pushes its slot onto the
//! finalizer thread's queue.
//!
//! The weak collections never mutate their maps from a death hook. Instead,
//! every operation that depends on membership drains the collection's queue
//! first, under the collection's own lock.

mod map;
mod queue;
mod set;
mod tracked;

pub use map::{WeakKeyMap, WeakValueMap};
pub use queue::{DeathQueue, WatchHandle};
pub use set::WeakSet;
pub use tracked::{Tracked, WeakRef};

pub(crate) use tracked::DeathHooks;
