//! `StrongPtr` is an owning, atomically reference-counted, nullable pointer.

use core::{
    any::Any,
    cmp,
    convert,
    fmt,
    hash,
    marker::PhantomData,
    mem,
    ops,
    ptr::{self, NonNull},
};

use crate::{
    policy::{StrongPolicy, WeakPolicy},
    record::{Allocation, Lifecycle, Record},
    weak::WeakPtr,
};

/// An owning, atomically reference-counted pointer, which may be null.
///
/// The counting behavior is selected by the policy `P`: [`Plain`](crate::Plain) for strong-only payloads,
/// [`Weakable`](crate::Weakable) for payloads which may also be referenced by a [`WeakPtr`].
///
/// The inherent methods of `StrongPtr` are all associated functions to avoid conflicts with the methods of the inner
/// type `T` which are brought into scope by the `Deref` implementation.
///
/// A non-null `StrongPtr` accounts for exactly one unit of the strong count, and, with `Weakable`, one unit of the weak
/// count.
///
/// #   Cycles
///
/// No cycle detection is performed: a payload holding a `StrongPtr` to itself, directly or not, stays alive until the
/// cycle is explicitly broken by its owner.
pub struct StrongPtr<T: ?Sized, P: StrongPolicy> {
    pointer: Option<NonNull<Allocation<T, P::Record>>>,
    _owned: PhantomData<T>,
    _policy: PhantomData<P>,
}

impl<T, P: StrongPolicy> StrongPtr<T, P> {
    /// Constructs a new `StrongPtr`, the sole owner of `value`.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let p = StrongPtr::<_, Plain>::new(42);
    /// assert_eq!(42, *p);
    /// assert_eq!(1, StrongPtr::strong_count(&p));
    /// ```
    pub fn new(value: T) -> Self {
        let allocation = Allocation::<T, P::Record>::boxed(value);

        //  Safety:
        //  -   Freshly allocated, hence unowned and live.
        unsafe { P::add_ref(allocation) };

        Self::from_allocation(Some(allocation))
    }

    /// Allocates `value` without owning it; all counts are 0.
    ///
    /// The result is to be adopted by `StrongPtr::from_raw` or `WeakPtr::from_raw`, otherwise it leaks. The first
    /// adoption must not race with any other access to the allocation.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let raw = StrongPtr::<_, Plain>::allocate(42);
    ///
    /// let p = unsafe { StrongPtr::<_, Plain>::from_raw(raw, true) };
    /// assert_eq!(1, StrongPtr::strong_count(&p));
    /// ```
    pub fn allocate(value: T) -> NonNull<T> {
        let allocation = Allocation::<T, P::Record>::boxed(value);

        tracing::trace!(allocation = ?allocation.as_ptr(), "allocated unowned payload");

        Allocation::value_ptr(allocation)
    }

    /// Splits `this` into the parts `coerce_strong!` unsizes; the strong reference is carried along.
    #[doc(hidden)]
    pub fn __into_coercible(this: Self) -> (*mut T, usize, PhantomData<P>) {
        let value = Self::into_allocation(this)
            .map_or(ptr::null_mut(), |allocation| Allocation::value_ptr(allocation).as_ptr());

        (value, Allocation::<T, P::Record>::sized_value_offset(), PhantomData)
    }
}

impl<T: ?Sized, P: StrongPolicy> StrongPtr<T, P> {
    /// Constructs a null `StrongPtr`.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let p = StrongPtr::<i32, Plain>::null();
    /// assert!(StrongPtr::is_null(&p));
    /// ```
    pub const fn null() -> Self { Self::from_allocation(None) }

    /// Constructs a `StrongPtr` from a pointer to a payload.
    ///
    /// If `add_ref` is true, a new strong reference is added; otherwise the reference already accounted for in the
    /// count, for example by `StrongPtr::detach`, is adopted.
    ///
    /// #   Safety
    ///
    /// -   `pointer` must have been obtained from a `StrongPtr<T, P>` or `WeakPtr<T, P>`, or `StrongPtr::allocate`.
    /// -   The payload must not have been destroyed.
    /// -   If `add_ref` is true, a strong reference must exist elsewhere, or the allocation must be unowned.
    /// -   If `add_ref` is false, a strong reference must have been relinquished to the caller.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let mut p = StrongPtr::<_, Plain>::new(42);
    /// let raw = StrongPtr::detach(&mut p).unwrap();
    /// assert!(StrongPtr::is_null(&p));
    ///
    /// let p = unsafe { StrongPtr::<_, Plain>::from_raw(raw, false) };
    /// assert_eq!(1, StrongPtr::strong_count(&p));
    /// ```
    pub unsafe fn from_raw(pointer: NonNull<T>, add_ref: bool) -> Self {
        //  Safety:
        //  -   Obtained from a live allocation, as per pre-conditions.
        let allocation = unsafe { Allocation::from_value_ptr(pointer) };

        if add_ref {
            //  Safety:
            //  -   Live, and owned elsewhere or unowned, as per pre-conditions.
            unsafe { P::add_ref(allocation) };
        }

        Self::from_allocation(Some(allocation))
    }

    /// Constructs a new `StrongPtr` to `value`, from within a payload already owned by a `StrongPtr`.
    ///
    /// #   Safety
    ///
    /// -   `value` must be the payload of an allocation managed by policy `P`.
    /// -   At least one strong reference to it must exist elsewhere, for the duration of the call.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// struct Node(u32);
    ///
    /// impl Node {
    ///     fn me(&self) -> StrongPtr<Node, Plain> {
    ///         //  Safety:
    ///         //  -   Nodes are only ever created by `StrongPtr::new`.
    ///         unsafe { StrongPtr::obtain_self_reference(self) }
    ///     }
    /// }
    ///
    /// let node = StrongPtr::<_, Plain>::new(Node(3));
    /// let me = node.me();
    ///
    /// assert!(StrongPtr::ptr_eq(&node, &me));
    /// assert_eq!(2, StrongPtr::strong_count(&node));
    /// ```
    pub unsafe fn obtain_self_reference(value: &T) -> Self {
        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::from_raw(NonNull::from(value), true) }
    }

    /// Replaces the target of `this` by `pointer`, releasing the previous target, if any.
    ///
    /// The new reference is acquired before the previous one is released, hence resetting to the current target is
    /// correct.
    ///
    /// #   Safety
    ///
    /// If `pointer` is not `None`, the pre-conditions of `StrongPtr::from_raw` apply.
    pub unsafe fn reset_to(this: &mut Self, pointer: Option<NonNull<T>>, add_ref: bool) {
        let replacement = match pointer {
            //  Safety:
            //  -   Forwarded pre-conditions.
            Some(pointer) => unsafe { Self::from_raw(pointer, add_ref) },
            None => Self::null(),
        };

        drop(mem::replace(this, replacement));
    }

    /// Releases the target of `this`, if any, leaving `this` null.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let mut p = StrongPtr::<_, Plain>::new(42);
    /// StrongPtr::reset(&mut p);
    ///
    /// assert!(StrongPtr::is_null(&p));
    /// ```
    pub fn reset(this: &mut Self) { drop(Self::take(this)); }

    /// Moves the target out of `this`, leaving `this` null; no count is modified.
    pub fn take(this: &mut Self) -> Self { mem::replace(this, Self::null()) }

    /// Swaps the targets of `this` and `other`; no count is modified.
    pub fn swap(this: &mut Self, other: &mut Self) { mem::swap(this, other); }

    /// Returns the pointer to the payload, leaving `this` null without releasing the reference.
    ///
    /// The reference is now the caller's; `StrongPtr::from_raw(pointer, false)` adopts it again.
    pub fn detach(this: &mut Self) -> Option<NonNull<T>> {
        Self::into_allocation(Self::take(this)).map(Allocation::value_ptr)
    }

    /// Returns the pointer to the payload, if any; no count is modified.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> { this.pointer.map(Allocation::value_ptr) }

    /// Returns a reference to the payload, or `None` if `this` is null.
    pub fn get(this: &Self) -> Option<&T> {
        //  Safety:
        //  -   The payload is live as long as `this` holds its strong reference.
        this.pointer.map(|allocation| unsafe { Allocation::value(allocation) })
    }

    /// Returns whether `this` is null.
    pub fn is_null(this: &Self) -> bool { this.pointer.is_none() }

    /// Returns true if both pointers have the same target, or are both null.
    pub fn ptr_eq<U: ?Sized, Q: StrongPolicy>(this: &Self, other: &StrongPtr<U, Q>) -> bool {
        Self::address(this) == StrongPtr::address(other)
    }

    /// Returns the strong count of the target, or 0 if `this` is null.
    ///
    /// The count may be stale by the time it is returned; it is for diagnostics only.
    pub fn strong_count(this: &Self) -> usize {
        //  Safety:
        //  -   Live as long as `this` holds its strong reference.
        this.pointer.map_or(0, |allocation| unsafe { P::refcount(allocation) })
    }

    /// Returns the lifecycle state of the target, or `None` if `this` is null.
    ///
    /// As `this` holds a strong reference, the state is necessarily `Alive`.
    pub fn lifecycle(this: &Self) -> Option<Lifecycle> {
        //  Safety:
        //  -   Live as long as `this` holds its strong reference.
        this.pointer.map(|allocation| unsafe { Allocation::record(allocation).lifecycle() })
    }

    /// Attempts to reinterpret the target as a `U`, consuming `this`; no count is modified.
    ///
    /// #   Safety
    ///
    /// -   The target must be a valid `U`, and `T` and `U` must have the same size and alignment, as `mem::transmute`
    ///     would require of them.
    /// -   Dropping the payload as a `U` must be equivalent to dropping it as a `T`.
    pub unsafe fn cast<U>(this: Self) -> StrongPtr<U, P> {
        let allocation = Self::into_allocation(this).map(NonNull::cast::<Allocation<U, P::Record>>);

        StrongPtr::from_allocation(allocation)
    }

    /// Reinterprets the target as a `U`, adding a strong reference.
    ///
    /// #   Safety
    ///
    /// See `StrongPtr::cast`.
    pub unsafe fn cast_cloned<U>(this: &Self) -> StrongPtr<U, P> {
        //  Safety:
        //  -   Forwarded pre-conditions.
        unsafe { Self::cast(this.clone()) }
    }

    pub(crate) const fn from_allocation(pointer: Option<NonNull<Allocation<T, P::Record>>>) -> Self {
        Self { pointer, _owned: PhantomData, _policy: PhantomData }
    }

    /// Adopts the reference of a coerced pointer; see `coerce_strong!`.
    ///
    /// #   Safety
    ///
    /// -   `value` and `offset` must have been obtained from `StrongPtr::__into_coercible`, possibly unsized since.
    #[doc(hidden)]
    pub unsafe fn __from_coerced(value: *mut T, offset: usize, _policy: PhantomData<P>) -> Self {
        //  Safety:
        //  -   The value pointer and offset of a live allocation, as per pre-conditions.
        let allocation = NonNull::new(value).map(|value| unsafe { Allocation::from_value_ptr_at(value, offset) });

        Self::from_allocation(allocation)
    }

    pub(crate) fn allocation(this: &Self) -> Option<NonNull<Allocation<T, P::Record>>> { this.pointer }

    pub(crate) fn into_allocation(this: Self) -> Option<NonNull<Allocation<T, P::Record>>> {
        let pointer = this.pointer;
        mem::forget(this);

        pointer
    }

    fn address(this: &Self) -> *const () {
        Self::as_ptr(this).map_or(ptr::null(), |pointer| pointer.as_ptr() as *const ())
    }
}

impl<T: ?Sized, P: WeakPolicy> StrongPtr<T, P> {
    /// Creates a new `WeakPtr` to the target of `this`.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{StrongPtr, Weakable};
    ///
    /// let p = StrongPtr::<_, Weakable>::new(42);
    /// let w = StrongPtr::downgrade(&p);
    ///
    /// assert_eq!(Some(&42), StrongPtr::get(&w.lock()));
    ///
    /// drop(p);
    /// assert!(StrongPtr::is_null(&w.lock()));
    /// ```
    pub fn downgrade(this: &Self) -> WeakPtr<T, P> { WeakPtr::new(this) }

    /// Returns the weak count of the target, or 0 if `this` is null.
    ///
    /// The count includes the unit held by each strong reference.
    pub fn weak_count(this: &Self) -> usize {
        //  Safety:
        //  -   Live as long as `this` holds its strong reference.
        this.pointer.map_or(0, |allocation| unsafe { P::weak_count(allocation) })
    }
}

impl<T: Any + Send + Sync, P: StrongPolicy> StrongPtr<T, P> {
    /// Converts into a `StrongPtr` to `dyn Any`, consuming `this`; no count is modified.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use std::any::Any;
    ///
    /// use refc::{Plain, StrongPtr};
    ///
    /// let p = StrongPtr::<_, Plain>::new(42u32);
    /// let any: StrongPtr<dyn Any + Send + Sync, Plain> = StrongPtr::into_any(p);
    ///
    /// let p = StrongPtr::downcast::<u32>(any).unwrap();
    /// assert_eq!(42, *p);
    /// ```
    pub fn into_any(this: Self) -> StrongPtr<dyn Any + Send + Sync, P> {
        let allocation = Self::into_allocation(this).map(|allocation| {
            let allocation: NonNull<Allocation<dyn Any + Send + Sync, P::Record>> = allocation;
            allocation
        });

        StrongPtr::from_allocation(allocation)
    }

    /// Converts into a `StrongPtr` to `dyn Any`, adding a strong reference.
    pub fn to_any(this: &Self) -> StrongPtr<dyn Any + Send + Sync, P> { Self::into_any(this.clone()) }
}

/// Converts a `StrongPtr<T, P>` into a `StrongPtr<U, P>`, where `T` unsizes to `U`, such as a trait object it
/// implements.
///
/// The target type must be spelled out at the call site. No count is modified, and the address is preserved.
///
/// #   Example
///
/// ```rust
/// use refc::{coerce_strong, Plain, StrongPtr};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 { self.0 * self.0 }
/// }
///
/// let square = StrongPtr::<_, Plain>::new(Square(2.0));
/// let shape: StrongPtr<dyn Shape, Plain> = coerce_strong!(square.clone());
///
/// assert_eq!(4.0, shape.area());
/// assert!(StrongPtr::ptr_eq(&square, &shape));
/// assert_eq!(2, StrongPtr::strong_count(&square));
/// ```
#[macro_export]
macro_rules! coerce_strong {
    ($pointer:expr) => {{
        let (value, offset, policy) = $crate::StrongPtr::__into_coercible($pointer);

        //  Safety:
        //  -   Split by `__into_coercible`; the pointer unsizes at the call.
        unsafe { $crate::StrongPtr::__from_coerced(value, offset, policy) }
    }};
}

impl<P: StrongPolicy> StrongPtr<dyn Any + Send + Sync, P> {
    /// Attempts to downcast to a concrete type, consuming `this`; no count is modified.
    ///
    /// On failure, including when `this` is null, `this` is returned as is.
    pub fn downcast<U: Any>(this: Self) -> Result<StrongPtr<U, P>, Self> {
        if !Self::get(&this).is_some_and(|value| value.is::<U>()) {
            return Err(this);
        }

        let allocation = Self::into_allocation(this).map(NonNull::cast::<Allocation<U, P::Record>>);

        Ok(StrongPtr::from_allocation(allocation))
    }

    /// Attempts to downcast to a concrete type, adding a strong reference on success.
    ///
    /// On failure, including when `this` is null, a null `StrongPtr` is returned and no count is modified.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use refc::{Plain, StrongPtr};
    ///
    /// let p = StrongPtr::<_, Plain>::new(42u32);
    /// let any = StrongPtr::to_any(&p);
    ///
    /// assert!(StrongPtr::is_null(&StrongPtr::downcast_cloned::<i64>(&any)));
    /// assert_eq!(2, StrongPtr::strong_count(&p));
    ///
    /// let q = StrongPtr::downcast_cloned::<u32>(&any);
    /// assert_eq!(p, q);
    /// assert_eq!(3, StrongPtr::strong_count(&p));
    /// ```
    pub fn downcast_cloned<U: Any>(this: &Self) -> StrongPtr<U, P> {
        if !Self::get(this).is_some_and(|value| value.is::<U>()) {
            return StrongPtr::null();
        }

        Self::downcast(this.clone()).unwrap_or_else(|_| StrongPtr::null())
    }
}

impl<T: ?Sized, P: StrongPolicy> Drop for StrongPtr<T, P> {
    #[inline]
    fn drop(&mut self) {
        if let Some(allocation) = self.pointer {
            //  Safety:
            //  -   `self` holds a strong reference, relinquished here.
            unsafe { P::release(allocation) };
        }
    }
}

impl<T: ?Sized, P: StrongPolicy> Clone for StrongPtr<T, P> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(allocation) = self.pointer {
            //  Safety:
            //  -   `self` holds a strong reference.
            unsafe { P::add_ref(allocation) };
        }

        Self::from_allocation(self.pointer)
    }
}

impl<T: ?Sized, P: StrongPolicy> Default for StrongPtr<T, P> {
    fn default() -> Self { Self::null() }
}

impl<T: ?Sized, P: StrongPolicy> ops::Deref for StrongPtr<T, P> {
    type Target = T;

    /// Dereferences the target.
    ///
    /// #   Panics
    ///
    /// If `self` is null.
    #[inline]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => null_deref(),
        }
    }
}

#[cold]
#[inline(never)]
fn null_deref() -> ! {
    panic!("dereferenced a null StrongPtr")
}

impl<T: ?Sized, P: StrongPolicy> convert::AsRef<T> for StrongPtr<T, P> {
    fn as_ref(&self) -> &T { &**self }
}

impl<T: ?Sized + fmt::Debug, P: StrongPolicy> fmt::Debug for StrongPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized, P: StrongPolicy> fmt::Pointer for StrongPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Self::address(self), f)
    }
}

impl<T: ?Sized, U: ?Sized, P: StrongPolicy> PartialEq<StrongPtr<U, P>> for StrongPtr<T, P> {
    fn eq(&self, other: &StrongPtr<U, P>) -> bool { Self::ptr_eq(self, other) }
}

impl<T: ?Sized, P: StrongPolicy> PartialEq<*const T> for StrongPtr<T, P> {
    fn eq(&self, other: &*const T) -> bool { Self::address(self) == *other as *const () }
}

impl<T: ?Sized, P: StrongPolicy> Eq for StrongPtr<T, P> {}

impl<T: ?Sized, P: StrongPolicy> PartialOrd for StrongPtr<T, P> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> { Some(self.cmp(other)) }
}

impl<T: ?Sized, P: StrongPolicy> Ord for StrongPtr<T, P> {
    fn cmp(&self, other: &Self) -> cmp::Ordering { Self::address(self).cmp(&Self::address(other)) }
}

impl<T: ?Sized, P: StrongPolicy> hash::Hash for StrongPtr<T, P> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) { Self::address(self).hash(state); }
}

unsafe impl<T: ?Sized + Send + Sync, P: StrongPolicy> Send for StrongPtr<T, P> {}

unsafe impl<T: ?Sized + Send + Sync, P: StrongPolicy> Sync for StrongPtr<T, P> {}

#[doc(hidden)]
pub mod compile_tests {

/// ```compile_fail,E0277
/// use std::cell::Cell;
///
/// use refc::{Plain, StrongPtr};
///
/// let p = StrongPtr::<_, Plain>::new(Cell::new(1));
/// std::thread::spawn(move || p.set(2)); // Cell is not Sync; this should fail to compile.
/// ```
pub fn strong_requires_sync_to_send() {}

/// ```compile_fail,E0277
/// use refc::{Plain, StrongPtr, WeakPtr};
///
/// let p = StrongPtr::<_, Plain>::new(1);
/// let _ = WeakPtr::new(&p); // Plain does not support weak pointers; this should fail to compile.
/// ```
pub fn strong_plain_cannot_downgrade() {}

/// ```compile_fail,E0277
/// use std::fmt::Display;
///
/// use refc::{coerce_strong, Plain, StrongPtr};
///
/// let p = StrongPtr::<_, Plain>::new(vec![1]);
/// let _: StrongPtr<dyn Display, Plain> = coerce_strong!(p); // Vec is not Display; this should fail to compile.
/// ```
pub fn strong_coerce_requires_unsize() {}

} // mod compile_tests

// mod tests
