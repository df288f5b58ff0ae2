//! `WeakPtr` is a non-owning, upgradeable, nullable pointer.

use core::{
    any::Any,
    fmt,
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
};

use crate::{
    policy::WeakPolicy,
    record::{Allocation, Lifecycle, Record},
    strong::StrongPtr,
};

/// A non-owning pointer, which may be null, and which may be upgraded to a [`StrongPtr`] while its target is alive.
///
/// A non-null `WeakPtr` accounts for exactly one unit of the weak count, whether its target is alive or not. It keeps
/// the storage of its target allocated, never the payload itself.
///
/// Only policies supporting weak references, that is [`Weakable`](crate::Weakable), may be used.
pub struct WeakPtr<T: ?Sized, P: WeakPolicy> {
    pointer: Option<NonNull<Allocation<T, P::Record>>>,
    _policy: PhantomData<P>,
}

impl<T: ?Sized, P: WeakPolicy> WeakPtr<T, P> {
    /// Constructs a null `WeakPtr`.
    pub const fn null() -> Self { Self::from_allocation(None) }

    /// Constructs a new `WeakPtr` to the target of `strong`, or a null one if `strong` is null.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{StrongPtr, WeakPtr, Weakable};
    ///
    /// let p = StrongPtr::<_, Weakable>::new(42);
    /// let w = WeakPtr::new(&p);
    ///
    /// assert_eq!(1, w.strong_count());
    /// assert_eq!(2, w.weak_count());
    /// ```
    pub fn new(strong: &StrongPtr<T, P>) -> Self {
        let pointer = StrongPtr::allocation(strong);

        if let Some(allocation) = pointer {
            //  Safety:
            //  -   `strong` holds a strong reference.
            unsafe { P::weak_add(allocation) };
        }

        Self::from_allocation(pointer)
    }

    /// Constructs a `WeakPtr` from a pointer to a payload, which may be unsized.
    ///
    /// Behaves as `WeakPtr::from_raw`, except that the alignment of the payload is read through it.
    ///
    /// #   Safety
    ///
    /// -   The pre-conditions of `WeakPtr::from_raw` apply.
    /// -   The payload must not have been destroyed.
    pub unsafe fn from_raw_unsized(pointer: NonNull<T>, add_ref: bool) -> Self {
        //  Safety:
        //  -   Obtained from an allocation whose payload is live, as per pre-conditions.
        let allocation = unsafe { Allocation::from_value_ptr(pointer) };

        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::adopt(allocation, add_ref) }
    }

    /// Attempts to upgrade to a `StrongPtr`.
    ///
    /// Returns a null `StrongPtr` if `self` is null, or if its target was destroyed. The upgrade is lock-free: it
    /// either fully succeeds or fully fails, even when racing with the release of the last strong reference.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{StrongPtr, WeakPtr, Weakable};
    ///
    /// let p = StrongPtr::<_, Weakable>::new(42);
    /// let w = WeakPtr::new(&p);
    ///
    /// assert_eq!(p, w.lock());
    ///
    /// drop(p);
    /// assert!(StrongPtr::is_null(&w.lock()));
    /// ```
    pub fn lock(&self) -> StrongPtr<T, P> {
        let Some(allocation) = self.pointer else {
            return StrongPtr::null();
        };

        //  Safety:
        //  -   `self` holds a weak reference.
        match unsafe { P::try_ref(allocation) } {
            //  The strong reference, and its weak unit, were accounted for by `try_ref`.
            Some(_) => StrongPtr::from_allocation(Some(allocation)),
            None => StrongPtr::null(),
        }
    }

    /// Points `self` to the target of `strong`, releasing the previous target, if any.
    pub fn assign(&mut self, strong: &StrongPtr<T, P>) { *self = Self::new(strong); }

    /// Releases the target of `self`, if any, leaving `self` null.
    pub fn reset(&mut self) { drop(self.take()); }

    /// Moves the target out of `self`, leaving `self` null; no count is modified.
    pub fn take(&mut self) -> Self { mem::replace(self, Self::null()) }

    /// Swaps the targets of `self` and `other`; no count is modified.
    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other); }

    /// Returns the pointer to the payload, leaving `self` null without releasing the weak reference.
    ///
    /// The payload may have been destroyed already; the pointer must not be dereferenced. `WeakPtr::from_raw(pointer,
    /// false)` adopts the reference again, even then.
    pub fn detach(&mut self) -> Option<NonNull<T>> {
        let pointer = self.pointer.take();

        pointer.map(Allocation::value_ptr)
    }

    /// Returns the pointer to the payload, if any; no count is modified.
    ///
    /// The payload may have been destroyed already; the pointer must not be dereferenced.
    pub fn as_ptr(&self) -> Option<NonNull<T>> { self.pointer.map(Allocation::value_ptr) }

    /// Returns whether `self` is null.
    pub fn is_null(&self) -> bool { self.pointer.is_none() }

    /// Returns true if `self` is null, or its target was destroyed.
    pub fn is_expired(&self) -> bool { self.strong_count() == 0 }

    /// Returns true if both pointers have the same target, or are both null.
    pub fn ptr_eq<U: ?Sized>(&self, other: &WeakPtr<U, P>) -> bool {
        let this = self.as_ptr().map(|pointer| pointer.cast::<()>());
        let other = other.as_ptr().map(|pointer| pointer.cast::<()>());

        this == other
    }

    /// Returns the strong count of the target, or 0 if `self` is null.
    pub fn strong_count(&self) -> usize {
        //  Safety:
        //  -   Not freed as long as `self` holds its weak reference.
        self.pointer.map_or(0, |allocation| unsafe { P::refcount(allocation) })
    }

    /// Returns the weak count of the target, or 0 if `self` is null.
    ///
    /// The count includes the unit held by each strong reference.
    pub fn weak_count(&self) -> usize {
        //  Safety:
        //  -   Not freed as long as `self` holds its weak reference.
        self.pointer.map_or(0, |allocation| unsafe { P::weak_count(allocation) })
    }

    /// Returns the lifecycle state of the target, or `None` if `self` is null.
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        //  Safety:
        //  -   Not freed as long as `self` holds its weak reference.
        self.pointer.map(|allocation| unsafe { Allocation::record(allocation).lifecycle() })
    }

    /// Adopts the reference of a coerced pointer; see `coerce_weak!`.
    ///
    /// #   Safety
    ///
    /// -   `value` and `offset` must have been obtained from `WeakPtr::__into_coercible`, possibly unsized since.
    #[doc(hidden)]
    pub unsafe fn __from_coerced(value: *mut T, offset: usize, _policy: PhantomData<P>) -> Self {
        //  Safety:
        //  -   The value pointer and offset of an allocation not yet freed, as per pre-conditions.
        let allocation = NonNull::new(value).map(|value| unsafe { Allocation::from_value_ptr_at(value, offset) });

        Self::from_allocation(allocation)
    }

    //  Safety:
    //  -   `allocation` must not have been freed.
    //  -   If `add_ref` is true, a reference must exist elsewhere, or the allocation must be unowned.
    //  -   If `add_ref` is false, a weak reference must have been relinquished to the caller.
    unsafe fn adopt(allocation: NonNull<Allocation<T, P::Record>>, add_ref: bool) -> Self {
        if add_ref {
            //  Safety:
            //  -   Not freed, as per pre-conditions.
            unsafe { P::weak_add(allocation) };
        }

        Self::from_allocation(Some(allocation))
    }

    const fn from_allocation(pointer: Option<NonNull<Allocation<T, P::Record>>>) -> Self {
        Self { pointer, _policy: PhantomData }
    }

    fn into_allocation(self) -> Option<NonNull<Allocation<T, P::Record>>> {
        let pointer = self.pointer;
        mem::forget(self);

        pointer
    }
}

impl<T, P: WeakPolicy> WeakPtr<T, P> {
    /// Constructs a `WeakPtr` from a pointer to a payload.
    ///
    /// If `add_ref` is true, a new weak reference is added; otherwise the weak reference already accounted for in the
    /// count, for example by `WeakPtr::detach`, is adopted.
    ///
    /// The payload is never read: it may have been destroyed already, as when re-adopting a reference detached from a
    /// zombie. An unowned allocation adopted by weak references only is never destroyed; its storage is freed on the
    /// last weak release.
    ///
    /// #   Safety
    ///
    /// -   `pointer` must have been obtained from a `StrongPtr<T, P>` or `WeakPtr<T, P>`, or `StrongPtr::allocate`.
    /// -   The allocation must not have been freed.
    /// -   If `add_ref` is true, a reference must exist elsewhere, or the allocation must be unowned.
    /// -   If `add_ref` is false, a weak reference must have been relinquished to the caller.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{StrongPtr, WeakPtr, Weakable};
    ///
    /// let p = StrongPtr::<_, Weakable>::new(String::from("gone"));
    /// let mut w = WeakPtr::new(&p);
    ///
    /// drop(p);
    ///
    /// let raw = w.detach().unwrap();
    /// let w = unsafe { WeakPtr::<String, Weakable>::from_raw(raw, false) };
    ///
    /// assert!(w.is_expired());
    /// assert_eq!(1, w.weak_count());
    /// ```
    pub unsafe fn from_raw(pointer: NonNull<T>, add_ref: bool) -> Self {
        //  Safety:
        //  -   Obtained from an allocation not yet freed, as per pre-conditions.
        let allocation = unsafe { Allocation::from_sized_value_ptr(pointer) };

        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::adopt(allocation, add_ref) }
    }

    /// Splits `this` into the parts `coerce_weak!` unsizes; the weak reference is carried along.
    #[doc(hidden)]
    pub fn __into_coercible(this: Self) -> (*mut T, usize, PhantomData<P>) {
        let value = this.into_allocation()
            .map_or(ptr::null_mut(), |allocation| Allocation::value_ptr(allocation).as_ptr());

        (value, Allocation::<T, P::Record>::sized_value_offset(), PhantomData)
    }
}

impl<T: Any + Send + Sync, P: WeakPolicy> WeakPtr<T, P> {
    /// Converts into a `WeakPtr` to `dyn Any`, consuming `self`; no count is modified.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use std::any::Any;
    ///
    /// use refc::{StrongPtr, WeakPtr, Weakable};
    ///
    /// let p = StrongPtr::<_, Weakable>::new(42u32);
    /// let w: WeakPtr<dyn Any + Send + Sync, Weakable> = WeakPtr::new(&p).into_any();
    ///
    /// let any = w.lock();
    /// assert_eq!(Some(&42), any.downcast_ref::<u32>());
    /// ```
    pub fn into_any(self) -> WeakPtr<dyn Any + Send + Sync, P> {
        let allocation = self.into_allocation().map(|allocation| {
            let allocation: NonNull<Allocation<dyn Any + Send + Sync, P::Record>> = allocation;
            allocation
        });

        WeakPtr::from_allocation(allocation)
    }
}

/// Converts a `WeakPtr<T, P>` into a `WeakPtr<U, P>`, where `T` unsizes to `U`, such as a trait object it implements.
///
/// The target type must be spelled out at the call site. No count is modified.
///
/// #   Example
///
/// ```rust
/// use std::fmt::Debug;
///
/// use refc::{coerce_weak, StrongPtr, WeakPtr, Weakable};
///
/// let p = StrongPtr::<_, Weakable>::new(42u32);
/// let w: WeakPtr<dyn Debug, Weakable> = coerce_weak!(WeakPtr::new(&p));
///
/// assert_eq!("42", format!("{:?}", &*w.lock()));
/// assert_eq!(2, StrongPtr::weak_count(&p));
/// ```
#[macro_export]
macro_rules! coerce_weak {
    ($pointer:expr) => {{
        let (value, offset, policy) = $crate::WeakPtr::__into_coercible($pointer);

        //  Safety:
        //  -   Split by `__into_coercible`; the pointer unsizes at the call.
        unsafe { $crate::WeakPtr::__from_coerced(value, offset, policy) }
    }};
}

impl<T: ?Sized, P: WeakPolicy> Drop for WeakPtr<T, P> {
    #[inline]
    fn drop(&mut self) {
        if let Some(allocation) = self.pointer {
            //  Safety:
            //  -   `self` holds a weak reference, relinquished here.
            unsafe { P::weak_release(allocation) };
        }
    }
}

impl<T: ?Sized, P: WeakPolicy> Clone for WeakPtr<T, P> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(allocation) = self.pointer {
            //  Safety:
            //  -   `self` holds a weak reference.
            unsafe { P::weak_add(allocation) };
        }

        Self::from_allocation(self.pointer)
    }
}

impl<T: ?Sized, P: WeakPolicy> Default for WeakPtr<T, P> {
    fn default() -> Self { Self::null() }
}

impl<T: ?Sized, P: WeakPolicy> From<&StrongPtr<T, P>> for WeakPtr<T, P> {
    fn from(strong: &StrongPtr<T, P>) -> Self { Self::new(strong) }
}

impl<T: ?Sized, P: WeakPolicy> fmt::Debug for WeakPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lifecycle() {
            None => f.write_str("(WeakPtr: null)"),
            Some(Lifecycle::Alive) => f.write_str("(WeakPtr)"),
            Some(_) => f.write_str("(WeakPtr: expired)"),
        }
    }
}

unsafe impl<T: ?Sized + Send + Sync, P: WeakPolicy> Send for WeakPtr<T, P> {}

unsafe impl<T: ?Sized + Send + Sync, P: WeakPolicy> Sync for WeakPtr<T, P> {}

// mod tests
