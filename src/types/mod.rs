//! Core types for the threadtools runtime.
//!
//! - [`id`]: Identifier types (`ThreadKey`, `MonitorId`, `TaskId`, `ObjectId`)
//! - [`outcome`]: Four-valued outcome type
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{MonitorId, ObjectId, TaskId, ThreadKey};
pub use outcome::{Outcome, PanicPayload};
