//! Property-based tests of the counts, over random sequences of pointer operations.
//!
//! Uses proptest to generate the sequences, and checks after every step that the counts match the pointers alive.

#![cfg(not(feature = "loom"))]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use proptest::prelude::*;
use refc::{Lifecycle, Plain, StrongPolicy, StrongPtr, WeakPtr, Weakable};

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) { self.0.fetch_add(1, Ordering::Relaxed); }
}

#[derive(Clone, Debug)]
enum Op {
    CloneStrong(usize),
    DropStrong(usize),
    TakeStrong(usize),
    ResetStrong(usize),
    Downgrade(usize),
    CloneWeak(usize),
    DropWeak(usize),
    Lock(usize),
}

/// Strategy for generating operations on either kind of pointers
fn weakable_op() -> impl Strategy<Value = Op> {
    let index = 0usize..8;

    prop_oneof![
        index.clone().prop_map(Op::CloneStrong),
        index.clone().prop_map(Op::DropStrong),
        index.clone().prop_map(Op::TakeStrong),
        index.clone().prop_map(Op::ResetStrong),
        index.clone().prop_map(Op::Downgrade),
        index.clone().prop_map(Op::CloneWeak),
        index.clone().prop_map(Op::DropWeak),
        index.prop_map(Op::Lock),
    ]
}

/// Strategy for generating operations on strong pointers only
fn plain_op() -> impl Strategy<Value = Op> {
    let index = 0usize..8;

    prop_oneof![
        index.clone().prop_map(Op::CloneStrong),
        index.clone().prop_map(Op::DropStrong),
        index.clone().prop_map(Op::TakeStrong),
        index.prop_map(Op::ResetStrong),
    ]
}

struct Pool<P: StrongPolicy> {
    drops: Arc<AtomicUsize>,
    strongs: Vec<StrongPtr<Tracked, P>>,
    weaks: Vec<WeakPtr<Tracked, Weakable>>,
}

impl<P: StrongPolicy> Pool<P> {
    fn new() -> Self {
        let drops = Arc::new(AtomicUsize::new(0));
        let strongs = vec![StrongPtr::new(Tracked(drops.clone()))];

        Self { drops, strongs, weaks: Vec::new() }
    }

    fn live_strongs(&self) -> usize { self.strongs.iter().filter(|p| !StrongPtr::is_null(p)).count() }

    fn live_weaks(&self) -> usize { self.weaks.iter().filter(|w| !w.is_null()).count() }

    fn drops(&self) -> usize { self.drops.load(Ordering::Relaxed) }

    fn apply_strong(&mut self, op: &Op) {
        let len = self.strongs.len();

        match *op {
            Op::CloneStrong(i) if len > 0 => {
                let clone = self.strongs[i % len].clone();
                self.strongs.push(clone);
            }
            Op::DropStrong(i) if len > 0 => {
                self.strongs.swap_remove(i % len);
            }
            Op::TakeStrong(i) if len > 0 => {
                let taken = StrongPtr::take(&mut self.strongs[i % len]);
                assert!(StrongPtr::is_null(&self.strongs[i % len]));
                self.strongs.push(taken);
            }
            Op::ResetStrong(i) if len > 0 => StrongPtr::reset(&mut self.strongs[i % len]),
            _ => {}
        }
    }

    fn check_strong(&self) -> Result<(), TestCaseError> {
        let live = self.live_strongs();

        for strong in self.strongs.iter().filter(|p| !StrongPtr::is_null(p)) {
            prop_assert_eq!(live, StrongPtr::strong_count(strong));
        }

        prop_assert_eq!(if live == 0 { 1 } else { 0 }, self.drops());

        Ok(())
    }
}

impl Pool<Weakable> {
    fn apply(&mut self, op: &Op) {
        let (strongs, weaks) = (self.strongs.len(), self.weaks.len());

        match *op {
            Op::Downgrade(i) if strongs > 0 => {
                let weak = WeakPtr::new(&self.strongs[i % strongs]);
                self.weaks.push(weak);
            }
            Op::CloneWeak(i) if weaks > 0 => {
                let clone = self.weaks[i % weaks].clone();
                self.weaks.push(clone);
            }
            Op::DropWeak(i) if weaks > 0 => {
                self.weaks.swap_remove(i % weaks);
            }
            Op::Lock(i) if weaks > 0 => {
                let upgraded = self.weaks[i % weaks].lock();
                self.strongs.push(upgraded);
            }
            _ => self.apply_strong(op),
        }
    }

    fn check(&self) -> Result<(), TestCaseError> {
        self.check_strong()?;

        let (live, weak) = (self.live_strongs(), self.live_weaks());

        for strong in self.strongs.iter().filter(|p| !StrongPtr::is_null(p)) {
            prop_assert_eq!(live + weak, StrongPtr::weak_count(strong));
        }

        for w in self.weaks.iter().filter(|w| !w.is_null()) {
            prop_assert_eq!(live, w.strong_count());
            prop_assert_eq!(live + weak, w.weak_count());

            let expected = if live == 0 { Lifecycle::Zombie } else { Lifecycle::Alive };
            prop_assert_eq!(Some(expected), w.lifecycle());
        }

        Ok(())
    }
}

proptest! {
    /// Strong and weak counts match the pointers alive, after every operation
    #[test]
    fn weakable_counts_match_pointers(ops in prop::collection::vec(weakable_op(), 1..64)) {
        let mut pool = Pool::<Weakable>::new();

        for op in &ops {
            pool.apply(op);
            pool.check()?;
        }

        drop(pool.strongs.drain(..));
        drop(pool.weaks.drain(..));
        prop_assert_eq!(1, pool.drops());
    }

    /// Strong counts match the pointers alive, after every operation
    #[test]
    fn plain_counts_match_pointers(ops in prop::collection::vec(plain_op(), 1..64)) {
        let mut pool = Pool::<Plain>::new();

        for op in &ops {
            pool.apply_strong(op);
            pool.check_strong()?;
        }

        drop(pool.strongs.drain(..));
        prop_assert_eq!(1, pool.drops());
    }

    /// Once expired, a weak pointer never upgrades again
    #[test]
    fn expired_never_upgrades(extra in 0usize..8) {
        let drops = Arc::new(AtomicUsize::new(0));
        let strong = StrongPtr::<_, Weakable>::new(Tracked(drops.clone()));
        let weaks: Vec<_> = (0..=extra).map(|_| WeakPtr::new(&strong)).collect();

        drop(strong);
        prop_assert_eq!(1, drops.load(Ordering::Relaxed));

        for weak in &weaks {
            prop_assert!(StrongPtr::is_null(&weak.lock()));
            prop_assert_eq!(extra + 1, weak.weak_count());
        }
    }
}
