//! Atomics used by the backout lock-counter, swappable for Loom's model-checked versions, and
//! the spin/yield backoff shared by every wait loop of the machine.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::atomic::AtomicU32;
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::atomic::AtomicU32;

pub(crate) use std::sync::atomic::Ordering;

#[cfg(all(feature = "loom", test))]
#[inline]
fn yield_now() {
    loom::thread::yield_now();
}

#[cfg(not(all(feature = "loom", test)))]
#[inline]
fn yield_now() {
    std::thread::yield_now();
}

/// Spin-then-yield backoff for compare-and-exchange contention.
///
/// Each CPU only ever holds another CPU's lock-counter for a short, non-blocking critical
/// section, so waiting is expected to converge quickly. `snooze` returns `false` once the
/// configured limit is exhausted; callers treat that as a logic error instead of spinning
/// forever. [`Backoff::unbounded`] never gives up and is meant for real locks.
#[derive(Debug)]
pub struct Backoff {
    spins: u32,
    limit: Option<u32>,
}

impl Backoff {
    pub fn new(limit: u32) -> Self {
        Self {
            spins: 0,
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            spins: 0,
            limit: None,
        }
    }

    /// Wait a little. Returns `false`, without waiting, once the limit is used up.
    pub fn snooze(&mut self) -> bool {
        if self.limit.is_some_and(|limit| self.spins >= limit) {
            return false;
        }
        self.spins = self.spins.wrapping_add(1);
        if self.spins % 64 == 0 {
            yield_now();
        } else {
            core::hint::spin_loop();
        }
        true
    }
}
