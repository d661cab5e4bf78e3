//! Monitors: mutable state behind a deadlock-aware lock.
//!
//! A [`Monitor<T>`] owns a [`MonitorSpace`] (the lock) and the state `T`.
//! The state is reachable only through a [`MonitorGuard`], which exists only
//! while the current thread owns the space, so there is no unsynchronized
//! access to forbid. Every exit path (return, `?`, panic unwinding) drops the
//! guard and releases the space.
//!
//! # Entering
//!
//! - [`Monitor::enter`] runs a closure under the lock and propagates its
//!   result unchanged. State is not rolled back on error.
//! - [`Monitor::lock`] returns the guard for scoped use.
//! - [`monitor_methods!`](crate::monitor_methods) generates entry methods on
//!   `Monitor<T>` that forward to methods of `T`.
//!
//! Recursion happens through the guard: helper calls made while holding it
//! receive `&mut MonitorGuard` or `&mut T` and never re-acquire. Calling
//! `enter` or `lock` again on a monitor whose guard the current thread already
//! holds fails immediately with `SoftDeadlock`.
//!
//! # Shared spaces
//!
//! Monitors created with [`Monitor::new_in`] or [`MonitorGuard::new_monitor`]
//! share one [`MonitorSpace`]. Holding any of them excludes other threads from
//! all of them, and while the space is held the owner enters the others
//! without acquiring again. Such a nested entry cannot wait on a condition,
//! since releasing the space would strand the outer guard's state.
//!
//! # Deadlocks
//!
//! An entrant that stays blocked for the configured deadlock delay registers
//! with [`crate::deadlock`]. If its wait closes a cycle it gets
//! `SoftDeadlock` instead of hanging; the other participants are unaffected.
//!
//! # Conditions
//!
//! [`MonitorGuard::wait`] releases the space, blocks until another owner
//! releases it after mutating the state (any use of `DerefMut` counts), and
//! re-acquires before re-checking the predicate. Waits are cancellable through
//! the current [`Cx`]; plain entry contention is not (it is interrupted only by
//! deadlock detection).

mod condition;
mod space;

pub use condition::Condition;
pub use space::MonitorSpace;

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::share::{ObjectType, Shareable};
use crate::tracing_compat::debug;
use crate::types::MonitorId;
use parking_lot::{Mutex, MutexGuard};
use space::Entry;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Mutable state guarded by a monitor space.
pub struct Monitor<T> {
    space: Arc<MonitorSpace>,
    data: Mutex<T>,
}

impl<T> Monitor<T> {
    /// Creates a monitor around `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            space: MonitorSpace::new(),
            data: Mutex::new(value),
        }
    }

    /// Creates a monitor around `value` that shares `space` with other
    /// monitors.
    #[must_use]
    pub fn new_in(space: &Arc<MonitorSpace>, value: T) -> Self {
        Self {
            space: Arc::clone(space),
            data: Mutex::new(value),
        }
    }

    /// Returns the monitor's identifier (shared by every monitor in its
    /// space).
    #[must_use]
    pub fn id(&self) -> MonitorId {
        self.space.id()
    }

    /// Returns the underlying space.
    #[must_use]
    pub fn space(&self) -> &Arc<MonitorSpace> {
        &self.space
    }

    /// Returns true if some thread currently owns the monitor.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.space.owner().is_some()
    }

    /// Returns the state through an exclusive borrow, without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the monitor and returns the state.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Acquires the monitor.
    ///
    /// Blocks while another thread owns it. Fails with `SoftDeadlock` if the
    /// current thread already holds this monitor's guard or if waiting would
    /// close a cycle. If the current thread owns the space through another
    /// monitor, the entry is nested and does not block.
    pub fn lock(&self) -> Result<MonitorGuard<'_, T>> {
        if self.space.is_held_by_current() {
            // Only the space owner can hold a data lock of this space.
            let data = self
                .data
                .try_lock()
                .ok_or_else(|| self.space.refuse_reentry())?;
            return Ok(MonitorGuard {
                data,
                entry: Entry {
                    space: &self.space,
                    dirty: false,
                    nested: true,
                },
            });
        }

        self.space.acquire(true)?;
        let entry = Entry {
            space: &self.space,
            dirty: false,
            nested: false,
        };
        Ok(MonitorGuard {
            data: self.data.lock(),
            entry,
        })
    }

    /// Runs `f` with the monitor held and returns its result.
    pub fn enter<R>(&self, f: impl FnOnce(&mut MonitorGuard<'_, T>) -> Result<R>) -> Result<R> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    /// Enters the monitor and waits until `condition` holds.
    pub fn wait_for(&self, condition: &Condition<T>) -> Result<()> {
        self.enter(|guard| guard.wait(condition))
    }
}

impl<T: Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.space.id())
            .field("owner", &self.space.owner())
            .finish_non_exhaustive()
    }
}

impl<T: Send> Shareable for Monitor<T> {}

impl<T: Send + 'static> ObjectType for Monitor<T> {
    const SHAREABLE: bool = true;

    fn type_name(&self) -> &'static str {
        "Monitor"
    }
}

/// Access to a monitor's state while the current thread owns it.
///
/// Field order matters: the state lock is released before the space.
pub struct MonitorGuard<'a, T> {
    data: MutexGuard<'a, T>,
    entry: Entry<'a>,
}

impl<T> MonitorGuard<'_, T> {
    /// Returns the identifier of the held monitor.
    #[must_use]
    pub fn monitor_id(&self) -> MonitorId {
        self.entry.space.id()
    }

    /// Waits until `condition` holds, releasing the monitor meanwhile.
    ///
    /// Fails with `Cancelled` (monitor re-acquired) if the current context
    /// is cancelled first.
    pub fn wait(&mut self, condition: &Condition<T>) -> Result<()> {
        debug!(monitor = %self.monitor_id(), condition = condition.name(), "waiting on condition");
        self.wait_until(condition.predicate())
    }

    /// Creates a monitor that shares this guard's space.
    #[must_use]
    pub fn new_monitor<U>(&self, value: U) -> Monitor<U> {
        Monitor::new_in(self.entry.space, value)
    }

    /// Returns true if this guard is a nested entry into a space the thread
    /// already held.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.entry.nested
    }

    /// Waits until `predicate` holds, releasing the monitor meanwhile.
    ///
    /// Fails with `InvalidState` instead of blocking on a nested entry.
    pub fn wait_until(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Result<()> {
        let cx = Cx::current();
        loop {
            if predicate(&self.data) {
                return Ok(());
            }
            if self.entry.nested {
                return Err(Error::invalid_state(
                    "cannot wait inside a nested entry of a shared monitor space",
                ));
            }
            cx.checkpoint()?;
            let signal = std::mem::take(&mut self.entry.dirty);
            let space = self.entry.space;
            MutexGuard::unlocked(&mut self.data, || space.wait_for_change(signal, &cx))?;
        }
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.entry.dirty = true;
        &mut self.data
    }
}

impl<T: fmt::Debug> fmt::Debug for MonitorGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorGuard")
            .field("monitor", &self.entry.space.id())
            .field("data", &*self.data)
            .finish()
    }
}

/// Generates monitor-entry methods for `Monitor<T>`.
///
/// Each declared method must exist on `T` with the same signature. The
/// generated trait method enters the monitor, calls it through the guard and
/// wraps its return value in [`Result`](crate::Result). Methods taking
/// `&mut self` mark the guard dirty and wake condition waiters on exit.
///
/// ```ignore
/// struct Counter { count: u64 }
///
/// impl Counter {
///     fn tick(&mut self) { self.count += 1; }
///     fn value(&self) -> u64 { self.count }
/// }
///
/// threadtools::monitor_methods! {
///     pub trait CounterMethods for Counter {
///         fn tick(&mut self);
///         fn value(&self) -> u64;
///     }
/// }
///
/// let counter = Monitor::new(Counter { count: 0 });
/// counter.tick()?;
/// assert_eq!(counter.value()?, 1);
/// ```
#[macro_export]
macro_rules! monitor_methods {
    (@ret) => { () };
    (@ret $ret:ty) => { $ret };
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident for $target:ty {
            $(
                $(#[$fmeta:meta])*
                fn $method:ident(&$(mut)? self $(, $arg:ident : $argty:ty)* $(,)?) $(-> $ret:ty)?;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name {
            $(
                $(#[$fmeta])*
                fn $method(&self $(, $arg: $argty)*)
                    -> $crate::Result<$crate::monitor_methods!(@ret $($ret)?)>;
            )*
        }

        impl $name for $crate::Monitor<$target> {
            $(
                fn $method(&self $(, $arg: $argty)*)
                    -> $crate::Result<$crate::monitor_methods!(@ret $($ret)?)> {
                    self.enter(|guard| Ok(guard.$method($($arg),*)))
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelReason;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Debug, Default)]
    struct Tally {
        total: i64,
        calls: u32,
    }

    impl Tally {
        fn add(&mut self, amount: i64) -> i64 {
            self.total += amount;
            self.calls += 1;
            self.total
        }

        fn total(&self) -> i64 {
            self.total
        }

        fn reset(&mut self) {
            self.total = 0;
        }
    }

    crate::monitor_methods! {
        trait TallyMethods for Tally {
            fn add(&mut self, amount: i64) -> i64;
            fn total(&self) -> i64;
            fn reset(&mut self);
        }
    }

    const POSITIVE: Condition<Tally> = Condition::new("positive", |t| t.total > 0);

    #[test]
    fn generated_methods_enter_the_monitor() {
        init_test("generated_methods_enter_the_monitor");
        let tally = Monitor::new(Tally::default());
        assert_eq!(tally.add(5).unwrap(), 5);
        assert_eq!(tally.add(-2).unwrap(), 3);
        assert_eq!(tally.total().unwrap(), 3);
        tally.reset().unwrap();
        assert_eq!(tally.total().unwrap(), 0);
        assert!(!tally.is_locked());
        crate::test_complete!("generated_methods_enter_the_monitor");
    }

    #[test]
    fn error_propagates_and_releases() {
        init_test("error_propagates_and_releases");
        let tally = Monitor::new(Tally::default());
        let err = tally
            .enter(|guard| -> Result<()> {
                guard.add(7);
                Err(crate::Error::invalid_state("rejected"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!tally.is_locked());
        // No rollback: the mutation before the error stays.
        assert_eq!(tally.total().unwrap(), 7);
        crate::test_complete!("error_propagates_and_releases");
    }

    #[test]
    fn panic_releases_monitor() {
        init_test("panic_releases_monitor");
        let tally = Arc::new(Monitor::new(Tally::default()));
        let inner = Arc::clone(&tally);
        let result = std::thread::spawn(move || {
            inner
                .enter(|guard| -> Result<()> {
                    guard.add(1);
                    panic!("boom");
                })
                .ok();
        })
        .join();
        assert!(result.is_err());
        assert!(!tally.is_locked());
        assert_eq!(tally.total().unwrap(), 1);
        crate::test_complete!("panic_releases_monitor");
    }

    #[test]
    fn reentry_by_owner_is_a_soft_deadlock() {
        init_test("reentry_by_owner_is_a_soft_deadlock");
        let tally = Monitor::new(Tally::default());
        let guard = tally.lock().unwrap();
        let err = tally.lock().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SoftDeadlock);
        assert_eq!(err.context().monitor_id, Some(tally.id()));
        drop(guard);
        assert!(tally.lock().is_ok());
        crate::test_complete!("reentry_by_owner_is_a_soft_deadlock");
    }

    #[test]
    fn nested_monitors_are_tracked_in_order() {
        init_test("nested_monitors_are_tracked_in_order");
        let outer = Monitor::new(0u8);
        let inner = Monitor::new(0u8);
        outer
            .enter(|_| {
                inner.enter(|_| {
                    let held = crate::deadlock::held_by(crate::types::ThreadKey::current());
                    assert_eq!(held, vec![outer.id(), inner.id()]);
                    Ok(())
                })
            })
            .unwrap();
        assert!(crate::deadlock::held_by(crate::types::ThreadKey::current()).is_empty());
        crate::test_complete!("nested_monitors_are_tracked_in_order");
    }

    #[test]
    fn wait_wakes_on_mutation() {
        init_test("wait_wakes_on_mutation");
        let tally = Arc::new(Monitor::new(Tally::default()));
        let waiter = {
            let tally = Arc::clone(&tally);
            std::thread::spawn(move || tally.wait_for(&POSITIVE))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        tally.add(3).unwrap();
        waiter.join().expect("waiter panicked").unwrap();
        crate::test_complete!("wait_wakes_on_mutation");
    }

    #[test]
    fn wait_is_cancellable() {
        init_test("wait_is_cancellable");
        let tally = Arc::new(Monitor::new(Tally::default()));
        let cx = Cx::for_testing();
        let remote = cx.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let waiter = {
            let tally = Arc::clone(&tally);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                let _current = Cx::set_current(cx);
                let result = tally.enter(|guard| {
                    let res = guard.wait(&POSITIVE);
                    // The monitor is held again even though the wait failed.
                    assert_eq!(tally.space().owner(), Some(crate::types::ThreadKey::current()));
                    assert_eq!(guard.monitor_id(), tally.id());
                    res
                });
                finished.store(true, Ordering::SeqCst);
                result
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!finished.load(Ordering::SeqCst));
        remote.cancel(&CancelReason::user("give up"));
        let err = waiter.join().expect("waiter panicked").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!tally.is_locked());
        crate::test_complete!("wait_is_cancellable");
    }

    #[test]
    fn clean_release_does_not_signal() {
        init_test("clean_release_does_not_signal");
        let tally = Monitor::new(Tally::default());
        let before = tally.space().generation();
        tally.total().unwrap();
        assert_eq!(tally.space().generation(), before);
        tally.add(1).unwrap();
        assert_eq!(tally.space().generation(), before + 1);
        crate::test_complete!("clean_release_does_not_signal");
    }

    #[test]
    fn shared_space_entry_nests_but_same_monitor_is_refused() {
        init_test("shared_space_entry_nests_but_same_monitor_is_refused");
        let outer = Monitor::new(Tally::default());
        let inner = Monitor::new_in(outer.space(), Tally::default());
        let me = crate::types::ThreadKey::current();

        let err = outer
            .enter(|o| {
                assert!(!o.is_nested());
                inner.enter(|i| {
                    assert!(i.is_nested());
                    i.add(2);
                    assert_eq!(crate::deadlock::held_by(me), vec![outer.id()]);
                    outer.lock().map(drop)
                })
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SoftDeadlock);
        assert!(!outer.is_locked());
        assert_eq!(inner.total().unwrap(), 2);
        crate::test_complete!("shared_space_entry_nests_but_same_monitor_is_refused");
    }

    #[test]
    fn nested_mutation_wakes_waiters_on_outer_release() {
        init_test("nested_mutation_wakes_waiters_on_outer_release");
        let outer = Monitor::new(0u8);
        let tally = Monitor::new_in(outer.space(), Tally::default());
        std::thread::scope(|s| {
            let waiter = s.spawn(|| tally.wait_for(&POSITIVE));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            // Only the nested entry mutates; the outer guard stays clean.
            outer.enter(|_| tally.add(4).map(drop)).unwrap();
            waiter.join().expect("waiter panicked").unwrap();
        });
        crate::test_complete!("nested_mutation_wakes_waiters_on_outer_release");
    }

    #[test]
    fn nested_entry_cannot_wait() {
        init_test("nested_entry_cannot_wait");
        let outer = Monitor::new(0u8);
        let tally = outer.lock().unwrap().new_monitor(Tally::default());
        let err = outer
            .enter(|_| tally.enter(|t| t.wait(&POSITIVE)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!outer.is_locked());
        crate::test_complete!("nested_entry_cannot_wait");
    }

    #[test]
    fn monitor_is_shareable_object() {
        let value = crate::share::Value::object(Monitor::new(1u32));
        assert!(crate::share::is_shareable(&value));
        assert_eq!(value.type_name(), "Monitor");
    }
}
