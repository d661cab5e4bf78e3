//! Capability context and interruptible blocking.
//!
//! Every thread has a current [`Cx`]. Threads that are not branch children get
//! a root context on first use; branch children run under a context whose
//! cancellation token is a child of the branch's token. Blocking helpers
//! consult the current context so they return promptly once it is cancelled:
//!
//! - [`Cx::sleep`] returns [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled)
//! - [`PipeReader::read`] returns [`ErrorKind::Interrupted`](crate::ErrorKind::Interrupted)
//! - condition waits and branch joins (see [`crate::monitor`], [`crate::branch`])

mod cx;
pub mod pipe;

pub use cx::{CurrentCxGuard, Cx};
pub use pipe::{pipe, PipeReader, PipeWriter};
