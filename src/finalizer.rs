//! The finalizer thread.
//!
//! [`finalize`] attaches a callback to a [`Tracked`] object. When the object
//! dies, its death hook queues the finalizer's slot on a process-wide
//! `SegQueue` and wakes a single worker thread, which runs the callback
//! outside the dying thread. The worker is spawned on first registration and
//! parks on a condition variable while the queue is empty.
//!
//! Every finalizer execution, on the worker or through [`Finalizer::call`],
//! holds one reentrant run lock, so callbacks never overlap and a callback may
//! call other finalizers directly. A panicking callback is logged and does not
//! take the worker down.

use crate::config;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, error, trace};
use crate::types::PanicPayload;
use crate::util::ArenaIndex;
use crate::weak::{DeathHooks, Tracked};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

static NEXT_FINALIZER_ID: AtomicU64 = AtomicU64::new(1);

struct Slot {
    id: u64,
    callback: Mutex<Option<Callback>>,
}

impl Slot {
    fn take(&self) -> Option<Callback> {
        self.callback.lock().take()
    }

    fn execute(&self, callback: Callback) -> std::result::Result<(), PanicPayload> {
        let _run = worker().run_lock.lock();
        debug!(finalizer = self.id, "running finalizer");
        panic::catch_unwind(AssertUnwindSafe(callback))
            .map_err(|payload| PanicPayload::from_any(&*payload))
    }
}

struct Worker {
    queue: SegQueue<Arc<Slot>>,
    pending: AtomicUsize,
    state: Mutex<WorkerState>,
    wake: Condvar,
    idle: Condvar,
    run_lock: ReentrantMutex<()>,
}

struct WorkerState {
    spawned: bool,
}

fn worker() -> &'static Worker {
    static WORKER: OnceLock<Worker> = OnceLock::new();
    WORKER.get_or_init(|| Worker {
        queue: SegQueue::new(),
        pending: AtomicUsize::new(0),
        state: Mutex::new(WorkerState { spawned: false }),
        wake: Condvar::new(),
        idle: Condvar::new(),
        run_lock: ReentrantMutex::new(()),
    })
}

impl Worker {
    fn ensure_started(&'static self) -> Result<()> {
        let mut state = self.state.lock();
        if state.spawned {
            return Ok(());
        }
        let name = config::current().finalizer_thread_name;
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|e| {
                Error::new(ErrorKind::SpawnFailed)
                    .with_message("can't spawn finalizer thread")
                    .with_source(e)
            })?;
        state.spawned = true;
        debug!(thread = %name, "finalizer thread started");
        Ok(())
    }

    fn submit(&self, slot: Arc<Slot>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.queue.push(slot);
        let _state = self.state.lock();
        self.wake.notify_one();
    }

    fn run(&self) {
        loop {
            while let Some(slot) = self.queue.pop() {
                if let Some(callback) = slot.take() {
                    if let Err(panic) = slot.execute(callback) {
                        error!(finalizer = slot.id, panic = %panic, "finalizer panicked");
                    }
                } else {
                    trace!(finalizer = slot.id, "finalizer already ran or was detached");
                }
                let _state = self.state.lock();
                if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.idle.notify_all();
                }
            }

            let mut state = self.state.lock();
            if self.queue.is_empty() {
                self.wake.wait(&mut state);
            }
        }
    }
}

/// A registered finalizer.
///
/// Dropping the handle does not cancel the finalizer; use
/// [`detach`](Self::detach) for that.
pub struct Finalizer {
    slot: Arc<Slot>,
    hooks: Weak<DeathHooks>,
    hook: Option<ArenaIndex>,
}

impl Finalizer {
    /// Returns true if the callback has neither run nor been detached.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.slot.callback.lock().is_some()
    }

    /// Runs the callback now, on the calling thread.
    ///
    /// Fails with `InvalidState` if it already ran (here or on the finalizer
    /// thread) or was detached, and with `Panicked` if the callback panics.
    pub fn call(&self) -> Result<()> {
        let callback = self
            .slot
            .take()
            .ok_or_else(|| Error::invalid_state("finalizer already called"))?;
        self.unhook();
        self.slot.execute(callback).map_err(|panic| {
            error!(finalizer = self.slot.id, panic = %panic, "finalizer panicked");
            Error::panicked(panic.message())
        })
    }

    /// Cancels the finalizer without running it; returns whether it was
    /// still pending.
    pub fn detach(&self) -> bool {
        let detached = self.slot.take().is_some();
        if detached {
            self.unhook();
            debug!(finalizer = self.slot.id, "finalizer detached");
        }
        detached
    }

    fn unhook(&self) {
        if let (Some(hooks), Some(hook)) = (self.hooks.upgrade(), self.hook) {
            hooks.remove(hook);
        }
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer")
            .field("id", &self.slot.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Registers `callback` to run on the finalizer thread after `target` dies.
///
/// Fails with `SpawnFailed` if the finalizer thread cannot be started.
pub fn finalize<T, F>(target: &Tracked<T>, callback: F) -> Result<Finalizer>
where
    F: FnOnce() + Send + 'static,
{
    let worker = worker();
    worker.ensure_started()?;

    let slot = Arc::new(Slot {
        id: NEXT_FINALIZER_ID.fetch_add(1, Ordering::Relaxed),
        callback: Mutex::new(Some(Box::new(callback))),
    });
    let queued = Arc::clone(&slot);
    let hook = target
        .hooks()
        .register(Box::new(move || worker.submit(queued)));
    trace!(finalizer = slot.id, object = ?target.id(), "finalizer registered");

    Ok(Finalizer {
        slot,
        hooks: Arc::downgrade(target.hooks()),
        hook,
    })
}

/// Returns the number of finalizers queued or running on the finalizer
/// thread.
#[must_use]
pub fn pending_finalizers() -> usize {
    worker().pending.load(Ordering::SeqCst)
}

/// Blocks until the finalizer thread has drained its queue, or `timeout`
/// elapses. Returns true if it is idle.
pub fn wait_idle(timeout: Duration) -> bool {
    let worker = worker();
    let deadline = Instant::now() + timeout;
    let mut state = worker.state.lock();
    while worker.pending.load(Ordering::SeqCst) > 0 {
        if worker.idle.wait_until(&mut state, deadline).timed_out() {
            return worker.pending.load(Ordering::SeqCst) == 0;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn runs_once_after_death() {
        init_test_logging();
        crate::test_phase!("runs_once_after_death");
        let obj = Tracked::new(vec![1, 2, 3]);
        let (count, callback) = counter();
        let fin = finalize(&obj, callback).unwrap();
        assert!(fin.is_alive());

        drop(obj);
        assert!(wait_idle(Duration::from_secs(5)));
        crate::assert_with_log!(
            count.load(Ordering::SeqCst) == 1,
            "finalizer ran exactly once",
            1,
            count.load(Ordering::SeqCst)
        );
        assert!(!fin.is_alive());
        assert_eq!(fin.call().unwrap_err().kind(), ErrorKind::InvalidState);
        crate::test_complete!("runs_once_after_death");
    }

    #[test]
    fn manual_call_preempts_worker() {
        init_test_logging();
        let obj = Tracked::new(());
        let (count, callback) = counter();
        let fin = finalize(&obj, callback).unwrap();
        fin.call().unwrap();
        let err = fin.call().unwrap_err();
        assert_eq!(err.message(), Some("finalizer already called"));

        drop(obj);
        assert!(wait_idle(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_prevents_run() {
        init_test_logging();
        let obj = Tracked::new(());
        let (count, callback) = counter();
        let fin = finalize(&obj, callback).unwrap();
        assert!(fin.detach());
        assert!(!fin.detach());
        drop(obj);
        assert!(wait_idle(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_finalizer_does_not_stop_worker() {
        init_test_logging();
        let bad = Tracked::new(());
        let good = Tracked::new(());
        finalize(&bad, || panic!("finalizer boom")).unwrap();
        let (count, callback) = counter();
        finalize(&good, callback).unwrap();
        drop(bad);
        drop(good);
        assert!(wait_idle(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_panic_is_reported() {
        init_test_logging();
        let obj = Tracked::new(());
        let fin = finalize(&obj, || panic!("manual boom")).unwrap();
        let err = fin.call().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panicked);
    }
}
