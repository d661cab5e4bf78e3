//! Named condition predicates over monitor state.

use std::fmt;

/// A named predicate over a monitor's state.
///
/// Declared as a `const` next to the state type and passed to
/// [`MonitorGuard::wait`](super::MonitorGuard::wait) or
/// [`Monitor::wait_for`](super::Monitor::wait_for):
///
/// ```ignore
/// const HIGH: Condition<Counter> = Condition::new("high", |c| c.count >= 10);
/// counter.wait_for(&HIGH)?;
/// ```
pub struct Condition<T> {
    name: &'static str,
    predicate: fn(&T) -> bool,
}

impl<T> Condition<T> {
    /// Creates a condition.
    #[must_use]
    pub const fn new(name: &'static str, predicate: fn(&T) -> bool) -> Self {
        Self { name, predicate }
    }

    /// Returns the condition's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Evaluates the predicate against `state`.
    #[must_use]
    pub fn holds(&self, state: &T) -> bool {
        (self.predicate)(state)
    }

    pub(crate) fn predicate(&self) -> fn(&T) -> bool {
        self.predicate
    }
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Condition<T> {}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.name).finish()
    }
}
