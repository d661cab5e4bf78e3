//! Cancellation tokens.
//!
//! A [`CancelToken`] is a shared flag plus a reason. Tokens form a tree: a
//! child created with [`CancelToken::child`] is cancelled (with
//! [`CancelKind::ParentCancelled`](crate::types::CancelKind::ParentCancelled))
//! whenever its parent is. Branches create one child token per scope, so
//! cancelling an outer branch reaches everything nested inside it.
//!
//! Blocking primitives (sleep, pipe reads, condition waits, branch joins)
//! register an interrupt callback with the token they run under. The callback
//! runs once, on the cancelling thread, after the token's own locks are
//! released; it usually locks the primitive's state and notifies a condition
//! variable so the blocked thread re-checks the flag.

use crate::types::CancelReason;
use crate::util::{Arena, ArenaIndex};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Interrupt = Arc<dyn Fn() + Send + Sync>;

struct TokenState {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    children: Mutex<Vec<Weak<TokenState>>>,
    interrupts: Mutex<Arena<Interrupt>>,
}

impl TokenState {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            interrupts: Mutex::new(Arena::new()),
        }
    }
}

/// A cloneable, hierarchical cancellation token.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Creates a new, uncancelled root token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState::new()),
        }
    }

    /// Creates a child token linked to this one.
    ///
    /// If this token is already cancelled the child starts cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();

        // cancel() sets the flag before reading children, so observing
        // !cancelled under the children lock means the child will be seen.
        let mut children = self.state.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel(&CancelReason::parent_cancelled());
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.state));
        }
        child
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.reason.lock().clone()
    }

    /// Requests cancellation with the given reason.
    ///
    /// Idempotent: a second call only strengthens the recorded reason. Returns
    /// true if this call triggered the cancellation.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self, reason: &CancelReason) -> bool {
        {
            let mut slot = self.state.reason.lock();
            match slot.as_mut() {
                Some(existing) => {
                    existing.strengthen(reason);
                }
                None => *slot = Some(reason.clone()),
            }
        }

        if self
            .state
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        crate::tracing_compat::debug!(reason = %reason, "cancellation requested");

        let interrupts: Vec<Interrupt> = {
            let interrupts = self.state.interrupts.lock();
            interrupts.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for interrupt in interrupts {
            interrupt();
        }

        let children: Vec<Self> = {
            let children = self.state.children.lock();
            children
                .iter()
                .filter_map(Weak::upgrade)
                .map(|state| Self { state })
                .collect()
        };
        let parent_reason = CancelReason::parent_cancelled();
        for child in children {
            child.cancel(&parent_reason);
        }

        true
    }

    /// Registers `interrupt` to run once when this token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on the
    /// calling thread. Dropping the returned registration unregisters it.
    pub(crate) fn on_cancel(&self, interrupt: impl Fn() + Send + Sync + 'static) -> InterruptRegistration {
        let interrupt: Interrupt = Arc::new(interrupt);
        let mut interrupts = self.state.interrupts.lock();
        if self.is_cancelled() {
            drop(interrupts);
            interrupt();
            return InterruptRegistration {
                state: Weak::new(),
                index: None,
            };
        }
        let index = interrupts.insert(interrupt);
        InterruptRegistration {
            state: Arc::downgrade(&self.state),
            index: Some(index),
        }
    }

    /// Returns true if both handles refer to the same token.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Keeps an interrupt callback registered with a token until dropped.
#[must_use]
pub(crate) struct InterruptRegistration {
    state: Weak<TokenState>,
    index: Option<ArenaIndex>,
}

impl Drop for InterruptRegistration {
    fn drop(&mut self) {
        if let (Some(index), Some(state)) = (self.index.take(), self.state.upgrade()) {
            state.interrupts.lock().remove(index);
        }
    }
}

/// A one-shot flag paired with a condition variable.
///
/// Used by blocking calls that have no condition variable of their own, such
/// as [`Cx::sleep`](crate::cx::Cx::sleep).
#[derive(Default)]
pub(crate) struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, bool> {
        self.raised.lock()
    }

    pub(crate) fn cond(&self) -> &Condvar {
        &self.cond
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelKind;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn cancel_is_idempotent_and_strengthens() {
        init_test("cancel_is_idempotent_and_strengthens");
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(&CancelReason::user("first")));
        assert!(!token.cancel(&CancelReason::fail_fast()));
        assert!(token.is_cancelled());
        let kind = token.reason().map(|r| r.kind());
        crate::assert_with_log!(
            kind == Some(CancelKind::FailFast),
            "reason strengthened",
            Some(CancelKind::FailFast),
            kind
        );
        crate::test_complete!("cancel_is_idempotent_and_strengthens");
    }

    #[test]
    fn children_follow_parent() {
        init_test("children_follow_parent");
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel(&CancelReason::user("stop"));
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(
            grandchild.reason().map(|r| r.kind()),
            Some(CancelKind::ParentCancelled)
        );
        crate::test_complete!("children_follow_parent");
    }

    #[test]
    fn child_does_not_cancel_parent() {
        init_test("child_does_not_cancel_parent");
        let root = CancelToken::new();
        let child = root.child();
        child.cancel(&CancelReason::fail_fast());
        assert!(!root.is_cancelled());
        crate::test_complete!("child_does_not_cancel_parent");
    }

    #[test]
    fn child_of_cancelled_token_starts_cancelled() {
        init_test("child_of_cancelled_token_starts_cancelled");
        let root = CancelToken::new();
        root.cancel(&CancelReason::user("early"));
        let child = root.child();
        assert!(child.is_cancelled());
        crate::test_complete!("child_of_cancelled_token_starts_cancelled");
    }

    #[test]
    fn interrupts_run_once() {
        init_test("interrupts_run_once");
        let token = CancelToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel(&CancelReason::user("a"));
        token.cancel(&CancelReason::user("b"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        crate::test_complete!("interrupts_run_once");
    }

    #[test]
    fn dropped_registration_is_not_called() {
        init_test("dropped_registration_is_not_called");
        let token = CancelToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(registration);
        token.cancel(&CancelReason::user("late"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        crate::test_complete!("dropped_registration_is_not_called");
    }

    #[test]
    fn registration_after_cancel_runs_immediately() {
        init_test("registration_after_cancel_runs_immediately");
        let token = CancelToken::new();
        token.cancel(&CancelReason::user("done"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        crate::test_complete!("registration_after_cancel_runs_immediately");
    }

    #[test]
    fn signal_wakes_waiter() {
        init_test("signal_wakes_waiter");
        let signal = Arc::new(Signal::default());
        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || remote.raise());
        let mut raised = signal.lock();
        while !*raised {
            signal.cond().wait(&mut raised);
        }
        drop(raised);
        handle.join().expect("raiser panicked");
        crate::test_complete!("signal_wakes_waiter");
    }
}
