//! The monitor space: ownership, contention and condition signalling.

use crate::config;
use crate::cx::Cx;
use crate::deadlock::{self, AbortHook, Resource};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{MonitorId, ThreadKey};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

struct SpaceState {
    owner: Option<ThreadKey>,
    contended: usize,
    generation: u64,
    // A nested entry mutated a monitor; signal on the outermost release.
    pending_signal: bool,
}

/// The lock half of a monitor.
///
/// Several monitors may share one space (see
/// [`Monitor::new_in`](super::Monitor::new_in)); they then exclude each other
/// and report the same [`MonitorId`]. Ownership is per thread. Entrants that find the space owned wait on
/// `idle`; condition waiters wait on `changed`, which is broadcast whenever
/// an owner that mutated the state releases the space.
pub struct MonitorSpace {
    id: MonitorId,
    state: Mutex<SpaceState>,
    idle: Condvar,
    changed: Condvar,
}

impl MonitorSpace {
    /// Creates an unowned space for [`Monitor::new_in`](super::Monitor::new_in).
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: MonitorId::next(),
            state: Mutex::new(SpaceState {
                owner: None,
                contended: 0,
                generation: 0,
                pending_signal: false,
            }),
            idle: Condvar::new(),
            changed: Condvar::new(),
        })
    }

    /// Returns the space's identifier.
    #[must_use]
    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Returns the owning thread, if any.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadKey> {
        self.state.lock().owner
    }

    /// Returns the number of threads blocked entering.
    #[must_use]
    pub fn contended(&self) -> usize {
        self.state.lock().contended
    }

    /// Returns the condition generation (bumped on every mutating release).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns true if the calling thread owns the space.
    #[must_use]
    pub fn is_held_by_current(&self) -> bool {
        self.state.lock().owner == Some(ThreadKey::current())
    }

    /// The error for entering a monitor whose state the caller already holds.
    pub(crate) fn refuse_reentry(&self) -> Error {
        if config::log_deadlocks() {
            warn!(monitor = %self.id, thread = %ThreadKey::current(), "monitor re-entered by its owner");
        }
        Error::soft_deadlock(self.id)
    }

    /// Records a mutation made through a nested entry.
    pub(crate) fn mark_dirty(&self) {
        self.state.lock().pending_signal = true;
    }

    fn take_ownership(&self, state: &mut SpaceState, me: ThreadKey) {
        state.owner = Some(me);
        deadlock::note_acquired(me, self.id);
    }

    /// Blocks until the calling thread owns the space.
    ///
    /// Abortable entrants fail with `SoftDeadlock` when their wait would close
    /// a cycle; the re-acquire after a condition wait is not abortable.
    pub(crate) fn acquire(self: &Arc<Self>, abortable: bool) -> Result<()> {
        let me = ThreadKey::current();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            drop(state);
            return Err(self.refuse_reentry());
        }

        if state.owner.is_none() {
            self.take_ownership(&mut state, me);
            trace!(monitor = %self.id, thread = %me, "monitor acquired");
            return Ok(());
        }

        state.contended += 1;
        debug!(monitor = %self.id, thread = %me, contended = state.contended, "contended monitor entry");

        let deadline = Instant::now() + config::deadlock_delay();
        while state.owner.is_some() {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        if state.owner.is_some() {
            drop(state);
            let result = self.acquire_slow(me, abortable);
            state = self.state.lock();
            state.contended -= 1;
            return result;
        }

        state.contended -= 1;
        self.take_ownership(&mut state, me);
        Ok(())
    }

    /// Registers with the deadlock detector and waits without a timeout.
    fn acquire_slow(self: &Arc<Self>, me: ThreadKey, abortable: bool) -> Result<()> {
        let abort: Option<AbortHook> = abortable.then(|| {
            let space = Arc::downgrade(self);
            let hook: AbortHook = Arc::new(move || {
                if let Some(space) = space.upgrade() {
                    let _state = space.state.lock();
                    space.idle.notify_all();
                }
            });
            hook
        });

        let registration = deadlock::begin_wait(me, Resource::Monitor(self.id), abort)
            .map_err(|_| Error::soft_deadlock(self.id))?;

        let mut state = self.state.lock();
        loop {
            if state.owner.is_none() {
                self.take_ownership(&mut state, me);
                drop(state);
                drop(registration);
                return Ok(());
            }
            if abortable && registration.is_aborted() {
                drop(state);
                return Err(Error::soft_deadlock(self.id));
            }
            self.idle.wait(&mut state);
        }
    }

    fn release_locked(&self, state: &mut SpaceState, me: ThreadKey, signal: bool) -> (bool, bool) {
        if state.owner != Some(me) {
            return (false, false);
        }
        state.owner = None;
        let signal = signal || std::mem::take(&mut state.pending_signal);
        if signal {
            state.generation = state.generation.wrapping_add(1);
        }
        deadlock::note_released(me, self.id);
        trace!(monitor = %self.id, thread = %me, signal, "monitor released");
        (state.contended > 0, signal)
    }

    fn notify(&self, wake_entrants: bool, wake_waiters: bool) {
        if wake_entrants {
            self.idle.notify_all();
        }
        if wake_waiters {
            self.changed.notify_all();
        }
    }

    /// Releases ownership; `signal` wakes condition waiters.
    pub(crate) fn release(&self, signal: bool) {
        let me = ThreadKey::current();
        let mut state = self.state.lock();
        let (entrants, waiters) = self.release_locked(&mut state, me, signal);
        drop(state);
        self.notify(entrants, waiters);
    }

    /// Releases ownership, blocks until the generation moves or `cx` is
    /// cancelled, then re-acquires.
    ///
    /// Returns `Cancelled` after re-acquiring if `cx` was cancelled.
    pub(crate) fn wait_for_change(self: &Arc<Self>, signal: bool, cx: &Cx) -> Result<()> {
        let me = ThreadKey::current();
        let space = Arc::downgrade(self);
        let _interrupt = cx.token().on_cancel(move || {
            if let Some(space) = space.upgrade() {
                let _state = space.state.lock();
                space.changed.notify_all();
            }
        });

        let mut state = self.state.lock();
        let (entrants, waiters) = self.release_locked(&mut state, me, signal);
        let observed = state.generation;
        self.notify(entrants, waiters);

        while state.generation == observed && !cx.is_cancel_requested() {
            self.changed.wait(&mut state);
        }
        drop(state);

        let cancelled = cx.is_cancel_requested();
        self.acquire(false)?;
        if cancelled {
            debug!(monitor = %self.id, task = %cx.task_id(), "condition wait cancelled");
            return Err(cx.cancelled_error());
        }
        Ok(())
    }
}

impl fmt::Debug for MonitorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MonitorSpace")
            .field("id", &self.id)
            .field("owner", &state.owner)
            .field("contended", &state.contended)
            .finish()
    }
}

/// Keeps a space owned until dropped.
///
/// A nested entry (a second monitor of a space the thread already owns) does
/// not release on drop; its mutations are signalled by the outermost release.
pub(crate) struct Entry<'a> {
    pub(crate) space: &'a Arc<MonitorSpace>,
    pub(crate) dirty: bool,
    pub(crate) nested: bool,
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        if !self.nested {
            self.space.release(self.dirty);
        } else if self.dirty {
            self.space.mark_dirty();
        }
    }
}
