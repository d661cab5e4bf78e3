//! Error types and error handling strategy for threadtools.
//!
//! Every fallible operation in the crate returns [`Result`], whose error is the
//! single [`Error`] struct. Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Cancellation responses are errors too, but they are classified separately
//!   so branch aggregation can tell them apart from real failures
//! - Panics are isolated and converted to [`ErrorKind::Panicked`]
//! - Aggregated failures carry their full cause set
//!
//! # Error Categories
//!
//! - **Sharing**: shareability violations and monitor state access
//! - **Monitor**: deadlock detection
//! - **Cancellation**: cooperative cancellation responses
//! - **Branch**: structured-concurrency scope failures
//! - **Reference**: weak references and death queues
//! - **Internal**: invalid states and runtime bugs
//! - **User**: application errors raised inside monitors or branches
//!
//! # Recovery Classification
//!
//! All errors can be classified by [`Recoverability`]:
//! - `Transient`: Temporary failure, safe to retry (e.g. a soft deadlock)
//! - `Permanent`: Unrecoverable, do not retry
//! - `Unknown`: Recoverability depends on context

use core::fmt;
use std::sync::Arc;

use crate::types::{CancelReason, MonitorId, TaskId, ThreadKey};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Sharing ===
    /// A non-shareable value was stored where shareability is required.
    NotShareable,
    /// Monitor state was accessed through an undeclared or unset attribute.
    StateAccess,

    // === Monitor ===
    /// Entering a monitor would have closed a cycle in the wait-for graph.
    ///
    /// This includes a thread calling `lock` or `enter` on a monitor whose
    /// guard it already holds. Recursive calls must go through the held
    /// `MonitorGuard` instead of entering again.
    SoftDeadlock,

    // === Cancellation ===
    /// The operation was cancelled at a suspension point.
    Cancelled,
    /// Blocking I/O was interrupted by cancellation of the reading context.
    Interrupted,

    // === Branch ===
    /// Two or more concurrent non-cancellation failures.
    Multiple,
    /// The OS refused a thread or the child limit was reached.
    SpawnFailed,
    /// A task panicked.
    Panicked,

    // === Reference ===
    /// The target of a weak reference no longer exists.
    Reference,
    /// A key was not present in a weak collection.
    KeyNotFound,

    // === Internal / state machine ===
    /// The operation is not valid in the current state.
    InvalidState,
    /// An argument did not belong to the receiver.
    InvalidArgument,
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotShareable | Self::StateAccess => ErrorCategory::Sharing,
            Self::SoftDeadlock => ErrorCategory::Monitor,
            Self::Cancelled | Self::Interrupted => ErrorCategory::Cancellation,
            Self::Multiple | Self::SpawnFailed | Self::Panicked => ErrorCategory::Branch,
            Self::Reference | Self::KeyNotFound => ErrorCategory::Reference,
            Self::InvalidState | Self::InvalidArgument | Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// This helps retry logic decide whether to attempt recovery.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::SoftDeadlock | Self::SpawnFailed => Recoverability::Transient,

            Self::NotShareable
            | Self::StateAccess
            | Self::Cancelled
            | Self::Interrupted
            | Self::Reference
            | Self::InvalidState
            | Self::InvalidArgument
            | Self::Internal => Recoverability::Permanent,

            Self::Multiple | Self::Panicked | Self::KeyNotFound | Self::User => {
                Recoverability::Unknown
            }
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    /// Returns the recommended recovery action for this error kind.
    ///
    /// This provides more specific guidance than [`recoverability()`](Self::recoverability)
    /// about how to handle the error.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        match self {
            // The cycle is already broken; retrying shortly usually succeeds.
            Self::SoftDeadlock => RecoveryAction::RetryWithBackoff(BackoffHint::QUICK),
            Self::SpawnFailed => RecoveryAction::RetryWithBackoff(BackoffHint::DEFAULT),

            Self::Cancelled
            | Self::Interrupted
            | Self::NotShareable
            | Self::StateAccess
            | Self::Reference
            | Self::KeyNotFound => RecoveryAction::Propagate,

            Self::Panicked | Self::Internal | Self::InvalidState | Self::InvalidArgument => {
                RecoveryAction::Escalate
            }

            Self::Multiple | Self::User => RecoveryAction::Custom,
        }
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// Recommended recovery action for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Retry the operation with exponential backoff.
    RetryWithBackoff(BackoffHint),
    /// Propagate the error to the caller without retry.
    Propagate,
    /// Escalate by cancelling the enclosing branch.
    Escalate,
    /// Recovery action depends on application-specific context.
    Custom,
}

/// Hints for configuring exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackoffHint {
    /// Suggested initial delay before first retry.
    pub initial_delay_ms: u32,
    /// Suggested maximum delay between retries.
    pub max_delay_ms: u32,
    /// Suggested maximum number of retry attempts.
    pub max_attempts: u8,
}

impl BackoffHint {
    /// Default backoff hint for transient errors.
    pub const DEFAULT: Self = Self {
        initial_delay_ms: 100,
        max_delay_ms: 30_000,
        max_attempts: 5,
    };

    /// Quick backoff for brief transient failures.
    pub const QUICK: Self = Self {
        initial_delay_ms: 10,
        max_delay_ms: 1_000,
        max_attempts: 3,
    };
}

impl Default for BackoffHint {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Shareability and state access violations.
    Sharing,
    /// Monitor contention failures.
    Monitor,
    /// Cancellation responses.
    Cancellation,
    /// Branch scope failures.
    Branch,
    /// Weak reference failures.
    Reference,
    /// Internal runtime errors.
    Internal,
    /// User-originated errors.
    User,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The task (branch child or root context) where the error originated.
    pub task_id: Option<TaskId>,
    /// The thread that observed the error.
    pub thread: Option<ThreadKey>,
    /// The monitor involved in the error.
    pub monitor_id: Option<MonitorId>,
}

/// The main error type for threadtools operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    causes: Arc<[Error]>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            causes: Arc::from(Vec::new()),
            context: ErrorContext::default(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is a `Cancelled` error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is merely a response to cancellation.
    ///
    /// Such errors are not counted as real failures by branch aggregation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::Interrupted)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches the cause set of an aggregated failure.
    #[must_use]
    pub fn with_causes(mut self, causes: Vec<Self>) -> Self {
        self.causes = Arc::from(causes);
        self
    }

    /// Returns the cause set attached by branch aggregation.
    ///
    /// The order is registration order, but callers should not rely on it.
    #[must_use]
    pub fn causes(&self) -> &[Self] {
        &self.causes
    }

    /// Downcasts the attached source error to a concrete type.
    #[must_use]
    pub fn source_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|s| s.downcast_ref::<E>())
    }

    /// Wraps an application error.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("{reason}"))
    }

    /// Creates the error raised by blocking I/O when its context is cancelled.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted).with_message("I/O operation interrupted by parent")
    }

    /// Creates a not-shareable error naming the offending value's type.
    #[must_use]
    pub fn not_shareable(type_name: &str) -> Self {
        Self::new(ErrorKind::NotShareable)
            .with_message(format!("{type_name} object is not shareable"))
    }

    /// Creates an attribute error for monitor state.
    #[must_use]
    pub fn state_access(type_name: &str, attribute: &str) -> Self {
        Self::new(ErrorKind::StateAccess).with_message(format!(
            "'{type_name}' object has no attribute '{attribute}'"
        ))
    }

    /// Creates a soft deadlock error for the given monitor.
    #[must_use]
    pub fn soft_deadlock(monitor: MonitorId) -> Self {
        Self::new(ErrorKind::SoftDeadlock)
            .with_message("monitor entrance failed due to deadlock")
            .with_context(ErrorContext {
                task_id: None,
                thread: Some(ThreadKey::current()),
                monitor_id: Some(monitor),
            })
    }

    /// Creates an aggregate of several concurrent failures.
    #[must_use]
    pub fn multiple(causes: Vec<Self>) -> Self {
        Self::new(ErrorKind::Multiple)
            .with_message(format!("{} concurrent failures", causes.len()))
            .with_causes(causes)
    }

    /// Creates an error for a caught panic.
    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the recommended recovery action for this error.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        self.kind.recovery_action()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(inner) = e.get_ref().and_then(|r| r.downcast_ref::<Self>()) {
            return inner.clone();
        }
        if e.kind() == std::io::ErrorKind::Interrupted {
            return Self::interrupted();
        }
        Self::new(ErrorKind::User).with_message(e.to_string()).with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for threadtools operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
