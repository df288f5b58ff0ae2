//! The ownership record: the atomic counters stored in front of every payload, and the heap block binding both.

use core::{
    fmt,
    mem::{self, ManuallyDrop},
    ptr::{self, NonNull},
};

use alloc::boxed::Box;

use crate::sync::{AtomicUsize, Ordering::Relaxed};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// The lifecycle state of an allocation, as derived from its counters.
///
/// The counters are read independently and with relaxed ordering, hence the state is only a snapshot: it may be stale
/// by the time it is returned. It is meant for diagnostics and tests, never for lifetime decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// No reference is accounted for.
    ///
    /// This is the state of a freshly allocated payload, before its first adoption by a pointer.
    Unowned,
    /// At least one strong reference exists; the payload is usable.
    Alive,
    /// The payload has been destroyed, yet weak references keep the storage, and thus the counters, allocated.
    ///
    /// An allocation that was only ever adopted by weak references is also a zombie: its payload is unreachable, and
    /// will be released without being destroyed.
    Zombie,
}

impl Lifecycle {
    /// Derives the state from a strong and a weak count.
    pub fn of(strong: usize, weak: usize) -> Self {
        match (strong, weak) {
            (0, 0) => Lifecycle::Unowned,
            (0, _) => Lifecycle::Zombie,
            _ => Lifecycle::Alive,
        }
    }
}

/// The counters of an allocation.
///
/// This trait is sealed; it is implemented by [`SingleCount`] and [`DualCount`] only.
pub trait Record: sealed::Sealed + Send + Sync + 'static {
    /// Creates a record with all counts at 0.
    fn unowned() -> Self;

    /// Returns the strong count, relaxed.
    fn strong(&self) -> usize;

    /// Returns the lifecycle state, relaxed.
    fn lifecycle(&self) -> Lifecycle;
}

/// The record of a strong-only payload: a single strong count.
pub struct SingleCount {
    pub(crate) strong: AtomicUsize,
}

impl sealed::Sealed for SingleCount {}

impl Record for SingleCount {
    fn unowned() -> Self { Self { strong: AtomicUsize::new(0) } }

    fn strong(&self) -> usize { self.strong.load(Relaxed) }

    fn lifecycle(&self) -> Lifecycle { Lifecycle::of(self.strong(), 0) }
}

impl fmt::Debug for SingleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleCount").field("strong", &self.strong()).finish()
    }
}

/// The record of a weak-capable payload: a strong and a weak count.
///
/// Every strong reference also holds one unit of the weak count, hence `weak >= strong` while any strong reference
/// exists.
pub struct DualCount {
    pub(crate) strong: AtomicUsize,
    pub(crate) weak: AtomicUsize,
}

impl DualCount {
    /// Returns the weak count, relaxed.
    ///
    /// The count includes the unit implicitly held by each strong reference.
    pub fn weak(&self) -> usize { self.weak.load(Relaxed) }
}

impl sealed::Sealed for DualCount {}

impl Record for DualCount {
    fn unowned() -> Self {
        Self {
            strong: AtomicUsize::new(0),
            weak: AtomicUsize::new(0),
        }
    }

    fn strong(&self) -> usize { self.strong.load(Relaxed) }

    fn lifecycle(&self) -> Lifecycle {
        //  Weak first: a strong reference acquired in between is then still accounted for in `weak`.
        let weak = self.weak();
        let strong = self.strong();

        Lifecycle::of(strong, weak)
    }
}

impl fmt::Debug for DualCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualCount")
            .field("strong", &self.strong())
            .field("weak", &self.weak())
            .finish()
    }
}

/// The heap block shared by all the pointers to one payload: the record, followed by the payload.
///
/// The payload is wrapped in `ManuallyDrop` so that it can be destroyed in place while the record remains readable, and
/// the block is only freed later.
#[repr(C)]
pub struct Allocation<T: ?Sized, R> {
    record: R,
    value: ManuallyDrop<T>,
}

impl<T, R: Record> Allocation<T, R> {
    //  Allocates a new block, with all counts at 0.
    pub(crate) fn boxed(value: T) -> NonNull<Self> {
        let allocation = Box::new(Allocation { record: R::unowned(), value: ManuallyDrop::new(value) });

        NonNull::from(Box::leak(allocation))
    }
}

impl<T, R> Allocation<T, R> {
    /// Recovers the allocation from a pointer to its payload; the payload is not read, and may have been destroyed.
    ///
    /// #   Safety
    ///
    /// -   `value` must have been obtained from `Allocation::value_ptr` of an `Allocation<T, R>`.
    pub(crate) unsafe fn from_sized_value_ptr(value: NonNull<T>) -> NonNull<Self> {
        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::from_value_ptr_at(value, Self::sized_value_offset()) }
    }

    /// Offset of the payload within the allocation.
    pub(crate) fn sized_value_offset() -> usize { Self::value_offset(mem::align_of::<T>()) }
}

impl<T: ?Sized, R> Allocation<T, R> {
    /// Returns the record.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation which has not been freed yet; it may be a zombie.
    /// -   The allocation must outlive `'a`.
    #[inline(always)]
    pub(crate) unsafe fn record<'a>(this: NonNull<Self>) -> &'a R {
        //  Safety:
        //  -   The record is live for as long as the allocation is, as per pre-conditions.
        //  -   No reference to the payload is formed.
        unsafe { &*ptr::addr_of!((*this.as_ptr()).record) }
    }

    /// Returns the payload.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation whose payload has not been destroyed yet.
    /// -   The payload must outlive `'a`.
    #[inline(always)]
    pub(crate) unsafe fn value<'a>(this: NonNull<Self>) -> &'a T {
        //  Safety:
        //  -   The payload is live, as per pre-conditions.
        unsafe { &*Self::value_ptr(this).as_ptr() }
    }

    /// Returns a pointer to the payload; the payload is not read.
    #[inline(always)]
    pub(crate) fn value_ptr(this: NonNull<Self>) -> NonNull<T> {
        //  Safety:
        //  -   The field projection of a non-null pointer is non-null.
        //  -   `ManuallyDrop<T>` is `repr(transparent)`, hence the cast preserves the pointee.
        unsafe {
            let value = ptr::addr_of_mut!((*this.as_ptr()).value) as *mut T;
            NonNull::new_unchecked(value)
        }
    }

    /// Recovers the allocation from a pointer to its payload.
    ///
    /// #   Safety
    ///
    /// -   `value` must have been obtained from `Allocation::value_ptr` of an `Allocation<T, R>`.
    /// -   The payload must not have been destroyed yet, as its alignment is read through it.
    pub(crate) unsafe fn from_value_ptr(value: NonNull<T>) -> NonNull<Self> {
        //  Safety:
        //  -   The payload is live, as per pre-conditions.
        let align = mem::align_of_val(unsafe { value.as_ref() });

        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::from_value_ptr_at(value, Self::value_offset(align)) }
    }

    /// Recovers the allocation from a pointer to its payload, located `offset` bytes past the start of the allocation.
    ///
    /// #   Safety
    ///
    /// -   `value` must have been obtained from `Allocation::value_ptr`, of an `Allocation<T, R>` or of an allocation
    ///     unsized into one.
    /// -   `offset` must be the offset of the payload within that allocation.
    pub(crate) unsafe fn from_value_ptr_at(value: NonNull<T>, offset: usize) -> NonNull<Self> {
        let allocation = value.as_ptr() as *mut Self;

        //  Safety:
        //  -   `value` was derived from an allocation, located `offset` bytes before it, as per pre-conditions.
        unsafe { NonNull::new_unchecked(allocation.byte_sub(offset)) }
    }

    /// Runs the payload destructor, leaving the record and the storage untouched.
    ///
    /// #   Safety
    ///
    /// -   `this` must point to an allocation whose payload has not been destroyed yet.
    /// -   No other reference to the payload may exist.
    /// -   The payload must never be accessed again.
    pub(crate) unsafe fn destroy(this: NonNull<Self>) {
        //  Safety:
        //  -   The payload is live, and exclusively accessible, as per pre-conditions.
        unsafe { ManuallyDrop::drop(&mut (*this.as_ptr()).value) }
    }

    /// Frees the storage; the payload destructor is not run.
    ///
    /// #   Safety
    ///
    /// -   `this` must have been allocated by `Allocation::boxed`, and not freed yet.
    /// -   No other reference to the allocation may exist.
    pub(crate) unsafe fn free(this: NonNull<Self>) {
        //  Safety:
        //  -   `this` was allocated by `Box`, as per pre-conditions.
        //  -   Dropping a `ManuallyDrop` does not drop its content, hence only the storage is released.
        drop(unsafe { Box::from_raw(this.as_ptr()) });
    }

    //  Offset of `value` within `Allocation`, as laid out by `repr(C)`.
    #[inline(always)]
    fn value_offset(align: usize) -> usize {
        let size = mem::size_of::<R>();

        (size + align - 1) & !(align - 1)
    }
}

// mod tests
