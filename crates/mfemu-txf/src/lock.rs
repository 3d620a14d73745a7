//! Exclusive-use lock-counter guarding one CPU's backout log.
//!
//! The word holds the number of log entries in its low 31 bits and an exclusive-use flag in bit
//! 31. Taking the lock installs `(count + 1) | LOCK`; the `+ 1` keeps every held value distinct
//! from `LOCK | 0`, which is reserved as the "backed out by another CPU" marker. Only the
//! owning CPU clears that marker.

use mfemu_core::logic_error;

use crate::sync::{AtomicU32, Ordering};

pub(crate) const LOCK: u32 = 1 << 31;
const COUNT_MASK: u32 = !LOCK;
/// Left behind by a CPU that backed out someone else's transaction.
pub(crate) const BACKED_OUT: u32 = LOCK;

/// Word installed by a successful [`LockCounter::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Held(u32);

impl Held {
    /// Ownership of a lock-counter that carries the backed-out marker. Only the CPU whose
    /// transaction was backed out may use it.
    pub(crate) const MARKER: Held = Held(BACKED_OUT);

    /// Entry count at the time the lock was taken.
    #[inline]
    pub(crate) fn count(self) -> u32 {
        (self.0 & COUNT_MASK) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TryLock {
    Locked(Held),
    /// The transaction was backed out on this CPU's behalf and awaits its delayed abort.
    BackedOut,
    /// Another CPU is inside its critical section.
    Busy,
}

#[derive(Debug)]
pub(crate) struct LockCounter {
    word: AtomicU32,
}

impl LockCounter {
    pub(crate) fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    pub(crate) fn try_lock(&self) -> TryLock {
        let current = self.word.load(Ordering::Acquire);
        if current == BACKED_OUT {
            return TryLock::BackedOut;
        }
        if current & LOCK != 0 {
            return TryLock::Busy;
        }
        if current == COUNT_MASK {
            logic_error!("backout lock-counter saturated at 0x{current:x}");
        }
        let held = (current + 1) | LOCK;
        match self
            .word
            .compare_exchange(current, held, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => TryLock::Locked(Held(held)),
            Err(_) => TryLock::Busy,
        }
    }

    /// Leave the critical section, publishing `new_count` entries.
    #[track_caller]
    pub(crate) fn release(&self, held: Held, new_count: u32) {
        debug_assert_eq!(new_count & LOCK, 0);
        if let Err(found) =
            self.word
                .compare_exchange(held.0, new_count, Ordering::Release, Ordering::Relaxed)
        {
            logic_error!(
                "backout lock-counter changed while held: expected 0x{:x}, found 0x{found:x}",
                held.0
            );
        }
    }

    /// Leave the critical section with the backed-out marker in place.
    #[track_caller]
    pub(crate) fn mark_backed_out(&self, held: Held) {
        if let Err(found) =
            self.word
                .compare_exchange(held.0, BACKED_OUT, Ordering::Release, Ordering::Relaxed)
        {
            logic_error!(
                "backout lock-counter changed while held: expected 0x{:x}, found 0x{found:x}",
                held.0
            );
        }
    }

    /// Whether the backed-out marker is in place.
    pub(crate) fn is_backed_out(&self) -> bool {
        self.word.load(Ordering::Acquire) == BACKED_OUT
    }

    /// Published entry count, or `None` while the lock is held.
    pub(crate) fn count(&self) -> Option<u32> {
        let word = self.word.load(Ordering::Acquire);
        (word & LOCK == 0).then_some(word)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn lock_installs_count_plus_one_and_release_publishes_new_count() {
        let counter = LockCounter::new();
        assert_eq!(counter.count(), Some(0));

        let TryLock::Locked(held) = counter.try_lock() else {
            panic!("uncontended lock must succeed");
        };
        assert_eq!(held.count(), 0);
        assert_eq!(held.0, LOCK | 1);
        assert_ne!(held.0, BACKED_OUT);
        assert_eq!(counter.try_lock(), TryLock::Busy);
        assert_eq!(counter.count(), None);

        counter.release(held, 3);
        assert_eq!(counter.count(), Some(3));

        let TryLock::Locked(held) = counter.try_lock() else {
            panic!("uncontended lock must succeed");
        };
        assert_eq!(held.count(), 3);
        counter.release(held, 3);
    }

    #[test]
    fn backed_out_marker_blocks_lockers_until_released_to_zero() {
        let counter = LockCounter::new();
        let TryLock::Locked(held) = counter.try_lock() else {
            panic!("uncontended lock must succeed");
        };
        counter.mark_backed_out(held);
        assert!(counter.is_backed_out());
        assert_eq!(counter.count(), None);
        assert_eq!(counter.try_lock(), TryLock::BackedOut);

        counter.release(Held::MARKER, 0);
        assert_eq!(counter.count(), Some(0));
    }

    #[test]
    #[should_panic(expected = "changed while held")]
    fn releasing_a_lock_that_is_not_held_is_a_logic_error() {
        let counter = LockCounter::new();
        counter.release(Held(LOCK | 5), 0);
    }
}
