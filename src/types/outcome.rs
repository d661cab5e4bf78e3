//! Four-valued outcome of a branch child or branch body.
//!
//! - `Ok(T)`: Success with value
//! - `Err(E)`: Application error (a real failure)
//! - `Cancelled(E)`: The task unwound in response to cancellation
//! - `Panicked(PanicPayload)`: The task panicked (a real failure)
//!
//! Branch aggregation counts only `Err` and `Panicked` as real failures; a
//! cancellation response is recorded for diagnostics but never decides the
//! branch outcome on its own.

use crate::error::Error;
use core::fmt;
use std::any::Any;

/// Payload from a caught panic.
///
/// This wraps the panic value for safe transport across thread boundaries.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from the value produced by `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The four-valued outcome of a task.
#[derive(Debug, Clone)]
pub enum Outcome<T, E = Error> {
    /// Success with a value.
    Ok(T),
    /// Application-level error.
    Err(E),
    /// The task unwound in response to cancellation.
    Cancelled(E),
    /// The task panicked.
    Panicked(PanicPayload),
}

impl<T, E> Outcome<T, E> {
    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this outcome is `Panicked`.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Returns true for outcomes that count as real failures.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Err(_) | Self::Panicked(_))
    }

    /// Maps the success value using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(e) => Outcome::Cancelled(e),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }
}

impl<T> Outcome<T, Error> {
    /// Classifies the result of a task body.
    ///
    /// Errors that are merely responses to cancellation become `Cancelled`.
    #[must_use]
    pub fn from_result(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) if e.is_cancellation() => Self::Cancelled(e),
            Err(e) => Self::Err(e),
        }
    }

    /// Converts the outcome back into a `Result`, turning panics into
    /// [`ErrorKind::Panicked`](crate::error::ErrorKind::Panicked) errors.
    pub fn into_result(self) -> crate::error::Result<T> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) | Self::Cancelled(e) => Err(e),
            Self::Panicked(p) => Err(Error::panicked(p.message)),
        }
    }
}
