//! `StrongPtr` and `WeakPtr` share ownership of a heap-allocated value through atomic reference counts stored alongside
//! the value, with neither garbage collector nor mutex.
//!
//! The counting behavior is chosen per pointer type by a policy:
//!
//! -   [`Plain`]: strong references only. The value is destroyed, and its storage freed, when the last `StrongPtr` is
//!     released.
//! -   [`Weakable`]: strong and weak references. The value is destroyed when the last `StrongPtr` is released, at
//!     which point the allocation becomes a _zombie_: its counters remain readable so that outstanding `WeakPtr` can
//!     observe that the value is gone. The storage is freed when the last reference of any kind is released.
//!
//! Upgrading a `WeakPtr` is lock-free, and never resurrects a value whose strong count reached 0.
//!
//! Only the existence of the value is synchronized; mutating it concurrently requires the value to provide its own
//! synchronization, as for `Arc`. Reference cycles are never collected: breaking them is the responsibility of their
//! owner.
//!
//! #   Example of usage.
//!
//! ```
//! use refc::{StrongPtr, WeakPtr, Weakable};
//!
//! type Strong<T> = StrongPtr<T, Weakable>;
//!
//! let strong = Strong::new("Hello, world!".to_string());
//! let weak = WeakPtr::new(&strong);
//!
//! //  Upgrading succeeds while a strong reference exists.
//! let upgraded = weak.lock();
//! assert_eq!("Hello, world!", &*upgraded);
//! assert_eq!(2, Strong::strong_count(&strong));
//!
//! drop(upgraded);
//! drop(strong);
//!
//! //  The value is gone, yet the weak pointer can still tell.
//! assert!(Strong::is_null(&weak.lock()));
//! ```
//!
//! #   Options
//!
//! The crate is defined for `no_std` environment and relies on `core` and `alloc`.
//!
//! The `std` feature, enabled by default, is only used to abort the process on reference count overflow. The `loom`
//! feature replaces the atomics by those of `loom`, for model checking. Please see `Cargo.toml` for an up-to-date list of
//! features, and their effects.
//!
//! #   Logging
//!
//! Lifecycle transitions, that is the destruction of a value and the freeing of its storage, are reported as `trace`
//! events through `tracing`. Increments emit nothing.

//  Regular features
#![cfg_attr(not(any(test, feature = "std")), no_std)]

//  Lints
#![deny(missing_docs)]

extern crate alloc;

mod policy;
mod record;
mod strong;
mod sync;
mod utils;
mod weak;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;

pub use self::policy::{Plain, StrongPolicy, Transition, WeakPolicy, Weakable};
pub use self::record::{Allocation, DualCount, Lifecycle, Record, SingleCount};
pub use self::strong::StrongPtr;
pub use self::weak::WeakPtr;
