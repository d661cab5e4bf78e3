//! Internal utilities for the threadtools runtime.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
