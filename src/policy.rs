//! The counting policies: the only code reading and writing the counters, and destroying or freeing allocations.
//!
//! Two flavors are provided:
//!
//! -   [`Plain`]: strong references only; the last release destroys the payload and frees the storage in one step.
//! -   [`Weakable`]: strong and weak references; the last strong release destroys the payload, turning the allocation
//!     into a zombie, and the last release of any kind frees the storage.
//!
//! #   Memory ordering
//!
//! Increments are relaxed: a new reference is always created from an existing one, which already guarantees the
//! allocation is live. Decrements use release ordering, and the decrement to 0 is followed by an acquire fence before
//! the payload is destroyed or the storage freed, so that all accesses made through other references happen before.

use core::ptr::NonNull;

use crate::{
    record::{sealed, Allocation, DualCount, Record, SingleCount},
    sync::{
        fence,
        Ordering::{Acquire, Relaxed, Release},
    },
    utils,
};

/// The outcome of a release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Other references remain; nothing was destroyed.
    Retained,
    /// The payload was destroyed; weak references keep the storage allocated.
    Zombified,
    /// The storage was freed.
    ///
    /// The payload was destroyed by the same release, unless the allocation was a zombie already.
    Freed,
}

/// The operations driving the strong count.
///
/// This trait is sealed; it is implemented by [`Plain`] and [`Weakable`] only.
pub trait StrongPolicy: sealed::Sealed + Sized + 'static {
    /// The counters carried by each allocation.
    type Record: Record;

    /// Adds a strong reference; returns the previous strong count.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation whose payload has not been destroyed.
    /// -   Unless the allocation is unowned, the caller must already hold a strong reference.
    unsafe fn add_ref<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> usize;

    /// Releases a strong reference, destroying and freeing as necessary.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation whose payload has not been destroyed.
    /// -   The caller must relinquish one strong reference, and not access the allocation afterwards.
    unsafe fn release<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> Transition;

    /// Returns the strong count, relaxed.
    ///
    /// The count may be stale by the time it is returned; it is for diagnostics only.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed.
    unsafe fn refcount<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> usize {
        //  Safety:
        //  -   Not freed, as per pre-conditions.
        unsafe { Allocation::record(this).strong() }
    }
}

/// The operations driving the weak count, and upgrading weak references.
///
/// This trait is sealed; it is implemented by [`Weakable`] only.
pub trait WeakPolicy: StrongPolicy {
    /// Attempts to add a strong reference on behalf of a weak reference; returns the previous strong count on success.
    ///
    /// Fails, returning `None`, if the strong count already reached 0, in which case it never increases again.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed.
    /// -   The caller must hold a weak reference for the duration of the call.
    unsafe fn try_ref<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> Option<usize>;

    /// Adds a weak reference; returns the previous weak count.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed.
    /// -   Unless the allocation is unowned, the caller must already hold a strong or weak reference.
    unsafe fn weak_add<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> usize;

    /// Releases a weak reference, freeing the storage as necessary.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed.
    /// -   The caller must relinquish one weak reference, and not access the allocation afterwards.
    unsafe fn weak_release<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> Transition;

    /// Returns the weak count, relaxed, including the unit held by each strong reference.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed.
    unsafe fn weak_count<T: ?Sized>(this: NonNull<Allocation<T, Self::Record>>) -> usize;
}

/// The strong-only policy: delete on zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Plain;

impl sealed::Sealed for Plain {}

impl StrongPolicy for Plain {
    type Record = SingleCount;

    #[inline]
    unsafe fn add_ref<T: ?Sized>(this: NonNull<Allocation<T, SingleCount>>) -> usize {
        //  Safety:
        //  -   Live, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        let previous = record.strong.fetch_add(1, Relaxed);
        utils::check_overflow(previous);

        previous
    }

    #[inline]
    unsafe fn release<T: ?Sized>(this: NonNull<Allocation<T, SingleCount>>) -> Transition {
        //  Safety:
        //  -   Live, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        let previous = record.strong.fetch_sub(1, Release);
        debug_assert_ne!(0, previous, "released an unowned allocation");

        if previous != 1 {
            return Transition::Retained;
        }

        fence(Acquire);

        tracing::trace!(allocation = ?this.as_ptr(), "last strong reference released, destroying and freeing");

        //  Safety:
        //  -   This was the last reference, and all accesses through other references happened before, as per fence.
        unsafe {
            Allocation::destroy(this);
            Allocation::free(this);
        }

        Transition::Freed
    }
}

/// The strong and weak policy: destroy on zero strong references, free on zero weak references.
///
/// Each strong reference also holds one weak reference, so that the counters outlive the payload for as long as any
/// reference is around to read them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Weakable;

impl sealed::Sealed for Weakable {}

impl StrongPolicy for Weakable {
    type Record = DualCount;

    #[inline]
    unsafe fn add_ref<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> usize {
        //  Safety:
        //  -   Live, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        utils::check_overflow(record.weak.fetch_add(1, Relaxed));

        let previous = record.strong.fetch_add(1, Relaxed);
        utils::check_overflow(previous);

        previous
    }

    #[inline]
    unsafe fn release<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> Transition {
        //  Safety:
        //  -   Live, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        let previous = record.strong.fetch_sub(1, Release);
        debug_assert_ne!(0, previous, "released a strong reference of a zombie");

        let zombified = previous == 1;

        if zombified {
            fence(Acquire);

            tracing::trace!(allocation = ?this.as_ptr(), "last strong reference released, destroying");

            //  Safety:
            //  -   This was the last strong reference, and `try_ref` never resurrects a count of 0.
            //  -   All accesses through other strong references happened before, as per fence.
            unsafe { Allocation::destroy(this) };
        }

        //  Safety:
        //  -   The weak unit implicitly held by this strong reference kept the allocation from being freed so far.
        match unsafe { Self::weak_release(this) } {
            Transition::Freed => Transition::Freed,
            _ if zombified => Transition::Zombified,
            _ => Transition::Retained,
        }
    }
}

impl WeakPolicy for Weakable {
    unsafe fn try_ref<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> Option<usize> {
        //  Safety:
        //  -   Not freed, and kept so by the caller's weak reference, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        //  Tentatively claim the weak unit the new strong reference will hold.
        utils::check_overflow(record.weak.fetch_add(1, Relaxed));

        let mut current = record.strong.load(Relaxed);

        while current != 0 {
            utils::check_overflow(current);

            match record.strong.compare_exchange_weak(current, current + 1, Acquire, Relaxed) {
                Ok(previous) => return Some(previous),
                Err(observed) => current = observed,
            }
        }

        //  The caller's own weak reference keeps this from reaching 0.
        let previous = record.weak.fetch_sub(1, Release);
        debug_assert!(previous > 1, "try_ref without holding a weak reference");

        None
    }

    #[inline]
    unsafe fn weak_add<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> usize {
        //  Safety:
        //  -   Not freed, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        let previous = record.weak.fetch_add(1, Relaxed);
        utils::check_overflow(previous);

        previous
    }

    #[inline]
    unsafe fn weak_release<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> Transition {
        //  Safety:
        //  -   Not freed, as per pre-conditions.
        let record = unsafe { Allocation::record(this) };

        let previous = record.weak.fetch_sub(1, Release);
        debug_assert_ne!(0, previous, "released a weak reference of an unowned allocation");

        if previous != 1 {
            return Transition::Retained;
        }

        fence(Acquire);

        tracing::trace!(allocation = ?this.as_ptr(), "last weak reference released, freeing");

        //  Safety:
        //  -   This was the last reference of any kind, and all accesses happened before, as per fence.
        //  -   The payload was destroyed by the last strong release, or never owned by a strong reference.
        unsafe { Allocation::free(this) };

        Transition::Freed
    }

    unsafe fn weak_count<T: ?Sized>(this: NonNull<Allocation<T, DualCount>>) -> usize {
        //  Safety:
        //  -   Not freed, as per pre-conditions.
        unsafe { Allocation::record(this).weak() }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {

use core::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::record::Lifecycle;

struct Tracked<'a>(&'a AtomicUsize);

impl Drop for Tracked<'_> {
    fn drop(&mut self) { self.0.fetch_add(1, Ordering::Relaxed); }
}

#[test]
fn plain_destroys_and_frees_on_last_release() {
    let drops = AtomicUsize::new(0);
    let allocation = Allocation::<_, SingleCount>::boxed(Tracked(&drops));

    unsafe {
        assert_eq!(0, Plain::refcount(allocation));
        assert_eq!(0, Plain::add_ref(allocation));
        assert_eq!(1, Plain::add_ref(allocation));
        assert_eq!(2, Plain::refcount(allocation));

        assert_eq!(Transition::Retained, Plain::release(allocation));
        assert_eq!(0, drops.load(Ordering::Relaxed));

        assert_eq!(Transition::Freed, Plain::release(allocation));
    }

    assert_eq!(1, drops.load(Ordering::Relaxed));
}

#[test]
fn weakable_alive_zombie_freed() {
    let drops = AtomicUsize::new(0);
    let allocation = Allocation::<_, DualCount>::boxed(Tracked(&drops));

    unsafe {
        let record = Allocation::record(allocation);
        assert_eq!(Lifecycle::Unowned, record.lifecycle());

        assert_eq!(0, Weakable::add_ref(allocation));
        //  The strong reference holds a weak unit already.
        assert_eq!(1, Weakable::weak_add(allocation));
        assert_eq!((1, 2), (record.strong(), record.weak()));
        assert_eq!(Lifecycle::Alive, record.lifecycle());

        assert_eq!(Transition::Zombified, Weakable::release(allocation));
        assert_eq!(1, drops.load(Ordering::Relaxed));
        assert_eq!((0, 1), (record.strong(), record.weak()));
        assert_eq!(Lifecycle::Zombie, record.lifecycle());

        assert_eq!(None, Weakable::try_ref(allocation));
        assert_eq!(1, Weakable::weak_count(allocation));

        assert_eq!(Transition::Freed, Weakable::weak_release(allocation));
    }

    assert_eq!(1, drops.load(Ordering::Relaxed));
}

#[test]
fn weakable_alive_freed() {
    let drops = AtomicUsize::new(0);
    let allocation = Allocation::<_, DualCount>::boxed(Tracked(&drops));

    unsafe {
        Weakable::add_ref(allocation);
        Weakable::add_ref(allocation);

        assert_eq!(Transition::Retained, Weakable::release(allocation));
        assert_eq!(Transition::Freed, Weakable::release(allocation));
    }

    assert_eq!(1, drops.load(Ordering::Relaxed));
}

#[test]
fn weakable_try_ref_keeps_weak_unit() {
    let drops = AtomicUsize::new(0);
    let allocation = Allocation::<_, DualCount>::boxed(Tracked(&drops));

    unsafe {
        Weakable::add_ref(allocation);
        Weakable::weak_add(allocation);

        assert_eq!(Some(1), Weakable::try_ref(allocation));
        assert_eq!(2, Weakable::refcount(allocation));
        assert_eq!(3, Weakable::weak_count(allocation));

        assert_eq!(Transition::Retained, Weakable::release(allocation));
        assert_eq!(Transition::Zombified, Weakable::release(allocation));
        assert_eq!(Transition::Freed, Weakable::weak_release(allocation));
    }

    assert_eq!(1, drops.load(Ordering::Relaxed));
}

#[test]
fn weakable_never_owned_is_never_destroyed() {
    let drops = AtomicUsize::new(0);
    let allocation = Allocation::<_, DualCount>::boxed(Tracked(&drops));

    unsafe {
        Weakable::weak_add(allocation);
        assert_eq!(Lifecycle::Zombie, Allocation::record(allocation).lifecycle());

        assert_eq!(None, Weakable::try_ref(allocation));
        assert_eq!(Transition::Freed, Weakable::weak_release(allocation));
    }

    assert_eq!(0, drops.load(Ordering::Relaxed));
}

} // mod tests
