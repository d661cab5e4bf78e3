//! Strong and weak handles with death notification.

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;
use crate::types::ObjectId;
use crate::util::{Arena, ArenaIndex};
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Callback run on the thread that drops the last strong handle.
pub(crate) type DeathHook = Box<dyn FnOnce() + Send>;

/// Hooks registered against one tracked object.
///
/// `None` once the object has died; later registrations are refused.
pub(crate) struct DeathHooks {
    hooks: Mutex<Option<Arena<DeathHook>>>,
}

impl DeathHooks {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hooks: Mutex::new(Some(Arena::new())),
        })
    }

    /// Registers `hook`; returns `None` if the object already died.
    pub(crate) fn register(&self, hook: DeathHook) -> Option<ArenaIndex> {
        self.hooks.lock().as_mut().map(|arena| arena.insert(hook))
    }

    /// Unregisters a hook; returns false if it already ran or was removed.
    pub(crate) fn remove(&self, index: ArenaIndex) -> bool {
        self.hooks
            .lock()
            .as_mut()
            .and_then(|arena| arena.remove(index))
            .is_some()
    }

    fn fire(&self, object: ObjectId) {
        let Some(mut arena) = self.hooks.lock().take() else {
            return;
        };
        let indices: Vec<ArenaIndex> = arena.iter().map(|(index, _)| index).collect();
        trace!(object = ?object, hooks = indices.len(), "tracked object died");
        for index in indices {
            if let Some(hook) = arena.remove(index) {
                hook();
            }
        }
    }
}

struct TrackedInner<T> {
    id: ObjectId,
    hooks: Arc<DeathHooks>,
    value: T,
}

impl<T> Drop for TrackedInner<T> {
    fn drop(&mut self) {
        self.hooks.fire(self.id);
    }
}

/// A strong, cloneable handle to a weakly referenceable object.
///
/// When the last `Tracked` for an object is dropped, every death hook
/// registered against it (death-queue watches, finalizers) runs exactly once
/// on the dropping thread. Equality and hashing are by identity.
pub struct Tracked<T> {
    inner: Arc<TrackedInner<T>>,
}

impl<T> Tracked<T> {
    /// Wraps `value` with a fresh identity.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(TrackedInner {
                id: ObjectId::next(),
                hooks: DeathHooks::new(),
                value,
            }),
        }
    }

    /// Returns the object's identity.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Creates a weak reference.
    #[must_use]
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef {
            inner: Arc::downgrade(&self.inner),
            id: self.inner.id,
        }
    }

    /// Returns the number of strong handles.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn hooks(&self) -> &Arc<DeathHooks> {
        &self.inner.hooks
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Tracked<T> {}

impl<T> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .finish()
    }
}

/// A weak reference to a [`Tracked`] object.
pub struct WeakRef<T> {
    inner: Weak<TrackedInner<T>>,
    id: ObjectId,
}

impl<T> WeakRef<T> {
    /// Returns the target's identity (stable after death).
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns a strong handle if the target is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Tracked<T>> {
        self.inner.upgrade().map(|inner| Tracked { inner })
    }

    /// Returns a strong handle, or a `Reference` error if the target died.
    pub fn get(&self) -> Result<Tracked<T>> {
        self.upgrade().ok_or_else(|| {
            Error::new(ErrorKind::Reference).with_message("weakly-referenced object no longer exists")
        })
    }

    /// Returns true if the target is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
            id: self.id,
        }
    }
}

impl<T> PartialEq for WeakRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for WeakRef<T> {}

impl<T> Hash for WeakRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
