//! Process-wide wait-for graph and cycle detection.
//!
//! The graph has two kinds of edges:
//!
//! - a thread waiting to enter a monitor points at the monitor's holder;
//! - a thread joining a branch child points at that child's thread.
//!
//! Monitor entrants only register an edge after they have been blocked for
//! [`deadlock_delay`](crate::config::RuntimeConfig::deadlock_delay), so the
//! uncontended and briefly contended paths never touch the graph beyond
//! ownership bookkeeping. Registration walks the graph under its lock; a
//! cycle is only ever reported from that consistent snapshot, so a thread that
//! is not actually deadlocked is never aborted. A cycle that forms while no
//! participant is registering is picked up by whichever participant registers
//! last.
//!
//! Resolution:
//!
//! - the registering thread is an abortable monitor entrant: it alone gets the
//!   error (the thread whose entry closed the loop);
//! - the registering thread cannot be aborted (a branch join, or a condition
//!   wait re-acquiring its monitor): the first abortable entrant along the
//!   cycle is marked aborted and woken through its abort hook.

use crate::tracing_compat::{debug, warn};
use crate::types::{MonitorId, ThreadKey};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Callback that wakes an aborted waiter so it can observe the abort.
pub(crate) type AbortHook = Arc<dyn Fn() + Send + Sync>;

/// What a blocked thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Entry into a monitor.
    Monitor(MonitorId),
    /// Termination of a branch child thread.
    Thread(ThreadKey),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitor(id) => write!(f, "{id}"),
            Self::Thread(key) => write!(f, "join {key}"),
        }
    }
}

struct Waiter {
    on: Resource,
    abort: Option<AbortHook>,
    aborted: bool,
}

#[derive(Default)]
struct WaitGraph {
    holders: HashMap<MonitorId, ThreadKey>,
    held: HashMap<ThreadKey, SmallVec<[MonitorId; 4]>>,
    waiting: HashMap<ThreadKey, Waiter>,
}

impl WaitGraph {
    /// Follows wait edges from `origin`; returns the threads on the cycle
    /// (starting with `origin`) if the walk comes back to it.
    fn find_cycle(&self, origin: ThreadKey) -> Option<Vec<ThreadKey>> {
        let mut path = vec![origin];
        let mut current = origin;
        loop {
            let waiter = self.waiting.get(&current)?;
            if waiter.aborted {
                return None;
            }
            let next = match waiter.on {
                Resource::Monitor(id) => *self.holders.get(&id)?,
                Resource::Thread(key) => key,
            };
            if next == origin {
                return Some(path);
            }
            if path.contains(&next) {
                // A cycle that does not pass through us is someone else's.
                return None;
            }
            path.push(next);
            current = next;
        }
    }
}

fn graph() -> &'static Mutex<WaitGraph> {
    static GRAPH: OnceLock<Mutex<WaitGraph>> = OnceLock::new();
    GRAPH.get_or_init(|| Mutex::new(WaitGraph::default()))
}

/// Records that `thread` now owns `monitor`, ending any wait it registered.
pub(crate) fn note_acquired(thread: ThreadKey, monitor: MonitorId) {
    let mut graph = graph().lock();
    graph.waiting.remove(&thread);
    graph.holders.insert(monitor, thread);
    graph.held.entry(thread).or_default().push(monitor);
}

/// Records that `thread` released `monitor`.
pub(crate) fn note_released(thread: ThreadKey, monitor: MonitorId) {
    let mut graph = graph().lock();
    if graph.holders.get(&monitor) == Some(&thread) {
        graph.holders.remove(&monitor);
    }
    if let Some(chain) = graph.held.get_mut(&thread) {
        if let Some(pos) = chain.iter().rposition(|m| *m == monitor) {
            chain.remove(pos);
        }
        if chain.is_empty() {
            graph.held.remove(&thread);
        }
    }
}

/// Returns the monitors `thread` currently owns, in acquisition order.
#[must_use]
pub fn held_by(thread: ThreadKey) -> Vec<MonitorId> {
    graph()
        .lock()
        .held
        .get(&thread)
        .map(|chain| chain.to_vec())
        .unwrap_or_default()
}

/// Returns what `thread` is registered as waiting for, if anything.
#[must_use]
pub fn waiting_on(thread: ThreadKey) -> Option<Resource> {
    graph().lock().waiting.get(&thread).map(|w| w.on)
}

/// Returns true if `thread` has a registered wait edge.
#[must_use]
pub fn is_waiting(thread: ThreadKey) -> bool {
    waiting_on(thread).is_some()
}

/// The registering thread's wait would close a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CycleDetected {
    pub(crate) cycle: Vec<ThreadKey>,
}

/// Registers a wait edge from `me` to `on` and checks for a cycle.
///
/// `abort` is `Some` for waiters that may be refused. Such a waiter gets
/// `Err(CycleDetected)` when its own edge closes a cycle, and may later be
/// aborted through the hook when a non-abortable waiter closes one.
pub(crate) fn begin_wait(
    me: ThreadKey,
    on: Resource,
    abort: Option<AbortHook>,
) -> Result<WaitRegistration, CycleDetected> {
    let abortable = abort.is_some();
    let mut graph = graph().lock();
    graph.waiting.insert(
        me,
        Waiter {
            on,
            abort,
            aborted: false,
        },
    );
    debug!(thread = %me, resource = %on, "registered wait edge");

    let Some(cycle) = graph.find_cycle(me) else {
        return Ok(WaitRegistration { me });
    };

    if abortable {
        graph.waiting.remove(&me);
        drop(graph);
        if crate::config::log_deadlocks() {
            warn!(thread = %me, resource = %on, cycle = ?cycle, "deadlock detected, refusing entry");
        }
        return Err(CycleDetected { cycle });
    }

    let victim = cycle.iter().skip(1).copied().find(|t| {
        graph
            .waiting
            .get(t)
            .is_some_and(|w| w.abort.is_some() && !w.aborted)
    });
    let hook = victim.and_then(|t| {
        let waiter = graph.waiting.get_mut(&t)?;
        waiter.aborted = true;
        waiter.abort.clone()
    });
    drop(graph);

    match (victim, hook) {
        (Some(victim), Some(hook)) => {
            if crate::config::log_deadlocks() {
                warn!(thread = %me, victim = %victim, cycle = ?cycle, "deadlock detected, aborting entrant");
            }
            hook();
        }
        _ => {
            warn!(thread = %me, cycle = ?cycle, "deadlock with no abortable participant");
        }
    }
    Ok(WaitRegistration { me })
}

/// A registered wait edge; dropping it removes the edge.
#[must_use]
pub(crate) struct WaitRegistration {
    me: ThreadKey,
}

impl WaitRegistration {
    /// Returns true if a later registrant aborted this wait.
    pub(crate) fn is_aborted(&self) -> bool {
        graph()
            .lock()
            .waiting
            .get(&self.me)
            .is_some_and(|w| w.aborted)
    }
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        graph().lock().waiting.remove(&self.me);
    }
}
