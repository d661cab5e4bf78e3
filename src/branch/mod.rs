//! Structured concurrency: branches own the threads they spawn.
//!
//! [`Branch::run`] opens a branch and runs its body on the calling thread with
//! a [`BranchScope`]. Children added through the scope run on their own named
//! OS threads. The branch does not return until every child has finished, so
//! children may borrow from the caller's stack.
//!
//! # Lifecycle
//!
//! ```text
//! New ──run()──► Open ──body returns──► Closing ──children joined──► Closed
//! ```
//!
//! Transitions are one-directional. Adding children outside `Open`, or running
//! a branch twice, fails with `InvalidState`.
//!
//! # Failure handling
//!
//! The first real failure (an error that is not a cancellation response, or a
//! panic) in the body or any child cancels the branch's base token with
//! [`CancelKind::FailFast`](crate::types::CancelKind::FailFast), interrupting
//! every blocking call in the remaining children. At close the failures are
//! aggregated in registration order, body first:
//!
//! | real failures | result |
//! |---------------|--------|
//! | 0 | body value, or `Cancelled` if the branch was cancelled from outside and some task unwound |
//! | 1 | that error, with every recorded failure as its causes |
//! | 2+ | `Multiple`, with every recorded failure as its causes |
//!
//! Results of `add_result` children are purged when the branch fails.
//!
//! # Joining
//!
//! The join waits on the children without a timeout. After the deadlock delay
//! it registers a non-abortable edge to each still-running child in the
//! wait-for graph, so a child blocked on a monitor the joiner holds is refused
//! with `SoftDeadlock` instead of hanging forever.

mod scope;

pub use scope::BranchScope;

use crate::cancel::CancelToken;
use crate::config;
use crate::cx::Cx;
use crate::deadlock::{self, Resource};
use crate::error::{Error, Result};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Outcome, PanicPayload, TaskId, ThreadKey};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// The state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchState {
    /// Created, not yet run.
    New,
    /// Body running; children may be added.
    Open,
    /// Body finished; waiting for children.
    Closing,
    /// Terminal.
    Closed,
}

impl BranchState {
    /// Returns true if the branch can accept new children.
    #[must_use]
    pub const fn can_spawn(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the branch is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

struct ChildRecord {
    task: TaskId,
    thread: Option<ThreadKey>,
    finished: bool,
}

struct BranchCore<T> {
    state: BranchState,
    token: Option<CancelToken>,
    children: Vec<ChildRecord>,
    alive: usize,
    failures: Vec<(usize, Error)>,
    results: BTreeMap<usize, T>,
}

/// A structured-concurrency scope.
///
/// `T` is the value type of children added with
/// [`BranchScope::add_result`].
pub struct Branch<T = ()> {
    core: Mutex<BranchCore<T>>,
    changed: Condvar,
}

fn wrong_state() -> Error {
    Error::invalid_state("called in wrong state")
}

fn outcome_error<V>(outcome: Outcome<V>) -> std::result::Result<V, Error> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) | Outcome::Cancelled(e) => Err(e),
        Outcome::Panicked(p) => Err(Error::panicked(p.message())),
    }
}

fn catch<V>(f: impl FnOnce() -> Result<V>) -> Outcome<V> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Outcome::from_result(result),
        Err(payload) => Outcome::Panicked(PanicPayload::from_any(&*payload)),
    }
}

impl<T> Branch<T> {
    /// Creates a branch in the `New` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Mutex::new(BranchCore {
                state: BranchState::New,
                token: None,
                children: Vec::new(),
                alive: 0,
                failures: Vec::new(),
                results: BTreeMap::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BranchState {
        self.core.lock().state
    }

    /// Returns the number of children added so far.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.core.lock().children.len()
    }

    /// Drains the values of finished `add_result` children, in registration
    /// order.
    ///
    /// Valid in any state; after a failed close the buffer is empty.
    pub fn get_results(&self) -> Vec<T> {
        std::mem::take(&mut self.core.lock().results)
            .into_values()
            .collect()
    }

    /// Opens the branch, runs `body`, joins every child and aggregates
    /// failures.
    ///
    /// The body runs on the calling thread under a context whose token is a
    /// child of the current context's token.
    pub fn run<'env, R, B>(&'env self, body: B) -> Result<R>
    where
        T: Send + 'env,
        B: for<'scope> FnOnce(&BranchScope<'scope, 'env, T>) -> Result<R>,
    {
        let parent = Cx::current();
        let base = parent.token().child();
        {
            let mut core = self.core.lock();
            if core.state != BranchState::New {
                return Err(wrong_state());
            }
            core.state = BranchState::Open;
            core.token = Some(base.clone());
        }
        let body_cx = Cx::with_token(base.clone());
        debug!(parent = %parent.task_id(), task = %body_cx.task_id(), "branch opened");

        let body_outcome = std::thread::scope(|s| {
            let scope = BranchScope::new(self, s, body_cx.clone());
            let outcome = {
                let _current = Cx::set_current(body_cx.clone());
                catch(|| body(&scope))
            };
            if outcome.is_failure() && base.cancel(&CancelReason::fail_fast()) {
                debug!(task = %body_cx.task_id(), "branch body failed, cancelling children");
            }
            self.core.lock().state = BranchState::Closing;
            self.join_children();
            outcome
        });

        self.close(body_outcome, &parent)
    }

    /// Blocks until every child has finished.
    fn join_children(&self) {
        let mut core = self.core.lock();
        let deadline = Instant::now() + config::deadlock_delay();
        while core.alive > 0 {
            if self.changed.wait_until(&mut core, deadline).timed_out() {
                break;
            }
        }

        let me = ThreadKey::current();
        while core.alive > 0 {
            let running = core
                .children
                .iter()
                .enumerate()
                .find_map(|(i, c)| match (c.finished, c.thread) {
                    (false, Some(thread)) => Some((i, thread)),
                    _ => None,
                });
            let Some((index, thread)) = running else {
                // Spawned but not started yet; it notifies once it has a key.
                self.changed.wait(&mut core);
                continue;
            };
            drop(core);
            let registration = deadlock::begin_wait(me, Resource::Thread(thread), None).ok();
            core = self.core.lock();
            while !core.children[index].finished {
                self.changed.wait(&mut core);
            }
            drop(registration);
        }
    }

    fn close<R>(&self, body: Outcome<R>, parent: &Cx) -> Result<R> {
        let mut core = self.core.lock();
        let mut children = std::mem::take(&mut core.failures);
        children.sort_by_key(|(index, _)| *index);

        let body = outcome_error(body);
        let mut failures: Vec<Error> = Vec::with_capacity(children.len() + 1);
        if let Err(e) = &body {
            failures.push(e.clone());
        }
        failures.extend(children.into_iter().map(|(_, e)| e));

        let real = failures.iter().filter(|e| !e.is_cancellation()).count();
        if real > 0 {
            core.results.clear();
        }
        core.state = BranchState::Closed;
        core.token = None;
        let spawned = core.children.len();
        drop(core);
        debug!(children = spawned, failures = failures.len(), real, "branch closed");

        match real {
            0 => match (body, parent.cancel_reason()) {
                (Ok(_), Some(reason)) if !failures.is_empty() => {
                    Err(Error::cancelled(&reason).with_causes(failures))
                }
                (Ok(value), _) => Ok(value),
                (Err(e), _) => Err(e.with_causes(failures)),
            },
            1 => {
                let primary = failures
                    .iter()
                    .find(|e| !e.is_cancellation())
                    .cloned()
                    .unwrap_or_else(|| Error::internal("lost branch failure"));
                Err(primary.with_causes(failures))
            }
            _ => Err(Error::multiple(failures)),
        }
    }

    /// Runs on the child thread.
    fn run_child(&self, index: usize, cx: &Cx, job: impl FnOnce(&Cx) -> Result<Option<T>>) {
        {
            let mut core = self.core.lock();
            core.children[index].thread = Some(ThreadKey::current());
            self.changed.notify_all();
        }
        let _current = Cx::set_current(cx.clone());
        let outcome = catch(|| job(cx));
        self.child_finished(index, outcome);
    }

    fn child_finished(&self, index: usize, outcome: Outcome<Option<T>>) {
        let mut core = self.core.lock();
        let failed = outcome.is_failure();
        let task = core.children[index].task;
        match outcome_error(outcome) {
            Ok(Some(value)) => {
                core.results.insert(index, value);
            }
            Ok(None) => {}
            Err(e) => core.failures.push((index, e)),
        }
        if failed {
            let first = core
                .token
                .as_ref()
                .is_some_and(|token| token.cancel(&CancelReason::fail_fast()));
            if first {
                debug!(task = %task, index, "branch child failed, cancelling siblings");
            }
        }
        core.children[index].finished = true;
        core.alive -= 1;
        debug!(task = %task, index, failed, alive = core.alive, "branch child finished");
        self.changed.notify_all();
    }
}

impl<T> Default for Branch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Branch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Branch")
            .field("state", &core.state)
            .field("children", &core.children.len())
            .field("alive", &core.alive)
            .finish_non_exhaustive()
    }
}
