//! Overflow guard shared by every increment.

/// Counts above this value are treated as an overflow.
///
/// Reaching it requires leaking `isize::MAX` pointers, which cannot be done without `mem::forget`.
pub(crate) const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Aborts if `previous`, the value of a counter before an increment, signals an overflow.
#[inline(always)]
pub(crate) fn check_overflow(previous: usize) {
    if is_overflow(previous) {
        overflow(previous);
    }
}

#[inline(always)]
fn is_overflow(previous: usize) -> bool { previous > MAX_REFCOUNT }

#[cold]
#[inline(never)]
fn overflow(previous: usize) -> ! {
    tracing::error!(previous, "reference count overflow, aborting");

    abort()
}

#[cfg(feature = "std")]
fn abort() -> ! {
    std::process::abort()
}

//  Panicking while panicking aborts.
#[cfg(not(feature = "std"))]
fn abort() -> ! {
    struct Abort;

    impl Drop for Abort {
        fn drop(&mut self) {
            panic!("reference count overflow");
        }
    }

    let _abort = Abort;

    panic!("reference count overflow");
}

// mod tests
