//! Threadtools: shared-state concurrency for preemptive OS threads.
//!
//! # Overview
//!
//! Threadtools gives threads that really run in parallel a small set of
//! structured primitives. Mutable state lives in monitors, concurrency lives in
//! branches, and everything else that crosses threads must be shareable. The
//! runtime detects soft deadlocks instead of hanging, and cancellation reaches
//! every blocking call a branch child can make.
//!
//! # Core Guarantees
//!
//! - **No unsynchronized state**: monitor state is reachable only through a guard
//!   held by the owning thread
//! - **No orphan threads**: a branch returns only after every child has finished
//! - **No silent failures**: child failures are aggregated at branch exit
//! - **No hangs on lock cycles**: one participant of a monitor wait cycle gets
//!   `SoftDeadlock`
//! - **Bounded death hooks**: object death only enqueues work
//!
//! # Module Structure
//!
//! - [`share`]: Shareability classification, shared containers, declared slots
//! - [`monitor`]: Monitors, guards and conditions
//! - [`deadlock`]: Process-wide wait-for graph
//! - [`branch`]: Structured concurrency with fail-fast cancellation
//! - [`cx`]: Capability context, interruptible sleep and pipes
//! - [`cancel`]: Hierarchical cancellation tokens
//! - [`weak`]: Weak references, the death queue, weak collections
//! - [`finalizer`]: The finalizer thread
//! - [`config`]: Runtime configuration (programmatic, environment, TOML)
//! - [`error`]: Error types
//! - [`types`]: Identifiers, outcomes, cancellation reasons
//! - [`util`]: Internal utilities (generational arena)
//!
//! # Example
//!
//! ```ignore
//! use threadtools::{Branch, Monitor};
//!
//! let total = Monitor::new(0u64);
//! let branch: Branch = Branch::new();
//! branch.run(|scope| {
//!     for i in 1..=4 {
//!         let total = &total;
//!         scope.add(move |_cx| total.enter(|t| { **t += i; Ok(()) }))?;
//!     }
//!     Ok(())
//! })?;
//! assert_eq!(total.into_inner(), 10);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod branch;
pub mod cancel;
pub mod config;
pub mod cx;
pub mod deadlock;
pub mod error;
pub mod finalizer;
pub mod monitor;
pub mod share;
pub mod tracing_compat;
pub mod types;
pub mod util;
pub mod weak;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use branch::{Branch, BranchScope, BranchState};
pub use cancel::CancelToken;
pub use config::{ConfigError, RuntimeConfig};
pub use cx::{pipe, Cx, PipeReader, PipeWriter};
pub use error::{
    BackoffHint, Error, ErrorCategory, ErrorContext, ErrorKind, Recoverability, RecoveryAction,
    Result, ResultExt,
};
pub use finalizer::{finalize, pending_finalizers, wait_idle, Finalizer};
pub use monitor::{Condition, Monitor, MonitorGuard, MonitorSpace};
pub use share::{
    is_shareable, share, ObjectType, Shareable, SharedDict, SharedSet, Slots, Value,
};
pub use types::{
    CancelKind, CancelReason, MonitorId, ObjectId, Outcome, PanicPayload, TaskId, ThreadKey,
};
pub use weak::{DeathQueue, Tracked, WatchHandle, WeakKeyMap, WeakRef, WeakSet, WeakValueMap};
