//! The death queue.

use super::tracked::{DeathHooks, Tracked};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;
use crate::types::ObjectId;
use crate::util::{Arena, ArenaIndex};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

struct Watch<P> {
    payload: P,
    object: ObjectId,
    hooks: Weak<DeathHooks>,
    hook: Option<ArenaIndex>,
}

struct QueueShared<P> {
    id: u64,
    watches: Mutex<Arena<Watch<P>>>,
    dead: SegQueue<ArenaIndex>,
}

/// Identifies one watch registered with a [`DeathQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    queue: u64,
    index: ArenaIndex,
    object: ObjectId,
}

impl WatchHandle {
    /// Returns the watched object's identity.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }
}

/// Collects payloads of watched objects as they die.
///
/// A watch attaches a payload to an object. When the object dies, its death
/// hook pushes the watch's index onto a lock-free queue; nothing else runs on
/// the dying thread. The owner drains the queue with [`pop`](Self::pop), in
/// death order, at points of its choosing.
pub struct DeathQueue<P> {
    shared: Arc<QueueShared<P>>,
}

impl<P: Send + 'static> DeathQueue<P> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                watches: Mutex::new(Arena::new()),
                dead: SegQueue::new(),
            }),
        }
    }

    /// Watches `target`; `payload` is returned by [`pop`](Self::pop) after it
    /// dies.
    pub fn watch<T>(&self, target: &Tracked<T>, payload: P) -> WatchHandle {
        let hooks = target.hooks();
        let mut watches = self.shared.watches.lock();
        let index = watches.insert(Watch {
            payload,
            object: target.id(),
            hooks: Arc::downgrade(hooks),
            hook: None,
        });

        let queue = Arc::downgrade(&self.shared);
        let hook = hooks.register(Box::new(move || {
            if let Some(queue) = queue.upgrade() {
                queue.dead.push(index);
            }
        }));
        match hook {
            Some(hook) => {
                if let Some(watch) = watches.get_mut(index) {
                    watch.hook = Some(hook);
                }
            }
            None => self.shared.dead.push(index),
        }
        drop(watches);

        trace!(queue = self.shared.id, object = ?target.id(), "watch registered");
        WatchHandle {
            queue: self.shared.id,
            index,
            object: target.id(),
        }
    }
}

impl<P> DeathQueue<P> {
    /// Cancels a watch.
    ///
    /// A no-op when the watch was already drained or cancelled. A watch whose
    /// object died but was not drained yet is dropped and never popped.
    /// Fails with `InvalidArgument` for a handle from another queue.
    pub fn cancel(&self, handle: WatchHandle) -> Result<()> {
        if handle.queue != self.shared.id {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("watch handle belongs to another death queue"));
        }
        self.unwatch(handle);
        Ok(())
    }

    pub(crate) fn unwatch(&self, handle: WatchHandle) {
        let removed = self.shared.watches.lock().remove(handle.index);
        if let Some(watch) = removed {
            if let (Some(hooks), Some(hook)) = (watch.hooks.upgrade(), watch.hook) {
                hooks.remove(hook);
            }
            trace!(queue = self.shared.id, object = ?watch.object, "watch cancelled");
        }
    }

    /// Pops the next dead object's payload, skipping cancelled watches.
    pub fn pop(&self) -> Option<(WatchHandle, P)> {
        while let Some(index) = self.shared.dead.pop() {
            let removed = self.shared.watches.lock().remove(index);
            if let Some(watch) = removed {
                trace!(queue = self.shared.id, object = ?watch.object, "death drained");
                let handle = WatchHandle {
                    queue: self.shared.id,
                    index,
                    object: watch.object,
                };
                return Some((handle, watch.payload));
            }
        }
        None
    }

    /// Returns true if no deaths are waiting to be drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.dead.is_empty()
    }

    /// Returns true if deaths are waiting to be drained.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.is_empty()
    }

    /// Returns the number of queued deaths (cancelled ones included until
    /// they are skipped).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.dead.len()
    }

    /// Returns the number of live or undrained watches.
    #[must_use]
    pub fn watched(&self) -> usize {
        self.shared.watches.lock().len()
    }
}

impl<P: Send + 'static> Default for DeathQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for DeathQueue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeathQueue")
            .field("id", &self.shared.id)
            .field("watched", &self.watched())
            .field("pending", &self.pending())
            .finish()
    }
}
