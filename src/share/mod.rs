//! Shareability classification.
//!
//! Data crosses thread boundaries in one of two ways:
//!
//! - **Shareable values** are immutable after construction and can be read
//!   from any thread without locking. Statically this is the [`Shareable`]
//!   marker; dynamically it is [`is_shareable`] over a [`Value`].
//! - **Monitors** ([`crate::Monitor`]) own mutable state and serialize every
//!   access through their lock. A monitor is itself shareable.
//!
//! Shared containers ([`SharedSet`], [`SharedDict`]) and declared monitor
//! state ([`Slots`]) check shareability at insertion time, so a container that
//! claims to be shareable never holds a mutable element.

mod containers;
mod slots;
mod value;

pub use containers::{SharedDict, SharedSet};
pub use slots::Slots;
pub use value::{is_shareable, DynObject, ObjectType, Value};

use std::sync::Arc;

/// Marker for types whose values may be shared between threads without a lock.
///
/// Implementors must not offer mutation through `&self` except via internal
/// synchronization that preserves the shareability of everything reachable.
pub trait Shareable: Send + Sync {}

macro_rules! shareable_primitives {
    ($($t:ty),* $(,)?) => {
        $(impl Shareable for $t {})*
    };
}

shareable_primitives!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    str,
    SharedSet,
    SharedDict,
);

impl<T: Shareable> Shareable for [T] {}
impl<T: Shareable + ?Sized> Shareable for &'static T {}
impl<T: Shareable + ?Sized> Shareable for Arc<T> {}
impl<T: Shareable + ?Sized> Shareable for Box<T> {}
impl<T: Shareable> Shareable for Option<T> {}

macro_rules! shareable_tuples {
    ($(($($name:ident),+)),* $(,)?) => {
        $(impl<$($name: Shareable),+> Shareable for ($($name,)+) {})*
    };
}

shareable_tuples!((A), (A, B), (A, B, C), (A, B, C, D), (A, B, C, D, E));

/// Wraps a statically shareable value for cheap cross-thread sharing.
#[must_use]
pub fn share<T: Shareable>(value: T) -> Arc<T> {
    Arc::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: Shareable>() {}

    #[test]
    fn primitives_and_tuples_are_shareable() {
        assert_shareable::<i64>();
        assert_shareable::<&'static str>();
        assert_shareable::<(u8, Arc<str>, Option<bool>)>();
        assert_shareable::<Arc<[f64]>>();
        assert_shareable::<SharedSet>();
    }

    #[test]
    fn share_wraps_in_arc() {
        let value = share((1u32, "one"));
        let copy = Arc::clone(&value);
        let seen = std::thread::spawn(move || copy.0)
            .join()
            .expect("reader panicked");
        assert_eq!(seen, 1);
        assert_eq!(value.1, "one");
    }
}
