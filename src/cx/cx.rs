//! The capability context type.
//!
//! `Cx` is the handle through which a thread observes cancellation:
//! - Querying identity (task ID)
//! - Checking cancellation status ([`Cx::checkpoint`])
//! - Sleeping interruptibly ([`Cx::sleep`])
//!
//! # Thread Safety
//!
//! `Cx` is `Send + Sync` and cheap to clone. The semantic contract is that a
//! `Cx` belongs to one task: branch children receive their own context and
//! should pass it by reference rather than storing it.

use crate::cancel::{CancelToken, Signal};
use crate::error::{Error, Result};
use crate::types::{CancelReason, TaskId};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT_CX: RefCell<Option<Cx>> = const { RefCell::new(None) };
}

struct CxInner {
    task: TaskId,
    token: CancelToken,
}

/// The capability context for a thread of control.
#[derive(Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

/// Guard that restores the previous current context on drop.
#[must_use]
pub struct CurrentCxGuard {
    prev: Option<Cx>,
}

impl Drop for CurrentCxGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_CX.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

impl Cx {
    pub(crate) fn with_token(token: CancelToken) -> Self {
        Self {
            inner: Arc::new(CxInner {
                task: TaskId::next(),
                token,
            }),
        }
    }

    /// Creates a detached root context.
    ///
    /// The context is not installed as current; use [`Cx::set_current`] for
    /// that.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::with_token(CancelToken::new())
    }

    /// Returns the current thread's context, creating a root one on first use.
    #[must_use]
    pub fn current() -> Self {
        CURRENT_CX.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| Self::with_token(CancelToken::new()))
                .clone()
        })
    }

    /// Makes `cx` the current context until the guard drops.
    pub fn set_current(cx: Self) -> CurrentCxGuard {
        let prev = CURRENT_CX.with(|slot| slot.borrow_mut().replace(cx));
        CurrentCxGuard { prev }
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.task
    }

    /// Returns the cancellation token this context observes.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.token.reason()
    }

    /// Requests cancellation of this context and everything derived from it.
    pub fn cancel(&self, reason: &CancelReason) {
        self.inner.token.cancel(reason);
    }

    /// Returns `Err(Cancelled)` if cancellation has been requested.
    ///
    /// Long computations that never block call this to offer a cancellation
    /// point.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(self.cancelled_error());
        }
        Ok(())
    }

    /// Sleeps for `duration`, returning early with `Cancelled` on cancellation.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.checkpoint()?;
        let deadline = Instant::now() + duration;
        let signal = Arc::new(Signal::default());
        let interrupt = Arc::clone(&signal);
        let _registration = self.inner.token.on_cancel(move || interrupt.raise());

        let mut raised = signal.lock();
        while !*raised {
            if signal.cond().wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        drop(raised);
        self.checkpoint()
    }

    pub(crate) fn cancelled_error(&self) -> Error {
        let reason = self.cancel_reason().unwrap_or_default();
        Error::cancelled(&reason)
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.inner.task)
            .field("cancelled", &self.is_cancel_requested())
            .finish()
    }
}
