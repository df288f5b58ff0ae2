//! Atomics used by the counters; `loom`'s when model checking.

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{AtomicUsize, Ordering, fence};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering, fence};
