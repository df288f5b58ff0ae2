//! Model checks of the lifecycle transitions, across all interleavings.

use loom::{
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    thread,
};

use crate::{Plain, StrongPtr, WeakPtr, Weakable};

const VALUE: usize = 100_500;

struct Payload {
    value: usize,
    drops: Arc<AtomicUsize>,
}

impl Payload {
    fn new(drops: &Arc<AtomicUsize>) -> Self { Self { value: VALUE, drops: drops.clone() } }
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.value = 0;
        self.drops.fetch_add(1, Relaxed);
    }
}

#[test]
fn lock_races_last_strong_release() {
    loom::model(|| {
        let drops = Arc::new(AtomicUsize::new(0));

        let strong = StrongPtr::<_, Weakable>::new(Payload::new(&drops));
        let weak = WeakPtr::new(&strong);

        let locker = thread::spawn(move || {
            let upgraded = weak.lock();

            if let Some(payload) = StrongPtr::get(&upgraded) {
                assert_eq!(VALUE, payload.value);
                assert_eq!(0, payload.drops.load(Relaxed));
            }
        });

        drop(strong);
        locker.join().unwrap();

        assert_eq!(1, drops.load(Relaxed));
    });
}

#[test]
fn last_strong_and_last_weak_release_race() {
    loom::model(|| {
        let drops = Arc::new(AtomicUsize::new(0));

        let strong = StrongPtr::<_, Weakable>::new(Payload::new(&drops));
        let weak = WeakPtr::new(&strong);

        let releaser = thread::spawn(move || drop(weak));

        drop(strong);
        releaser.join().unwrap();

        assert_eq!(1, drops.load(Relaxed));
    });
}

#[test]
fn strong_releases_race() {
    loom::model(|| {
        let drops = Arc::new(AtomicUsize::new(0));

        let strong = StrongPtr::<_, Plain>::new(Payload::new(&drops));
        let other = strong.clone();

        let releaser = thread::spawn(move || {
            assert_eq!(VALUE, other.value);
            drop(other);
        });

        drop(strong);
        releaser.join().unwrap();

        assert_eq!(1, drops.load(Relaxed));
    });
}
