use core::sync::atomic::{AtomicU32, Ordering};

use mfemu_core::{logic_error, CpuId};
use mfemu_txf::Backoff;

const NO_HOLDER: u32 = u32::MAX;

/// Machine-wide serialization token (`intlock`).
///
/// Whole-machine invalidation requires the requesting CPU to hold it.
#[derive(Debug)]
pub struct Interlock {
    holder: AtomicU32,
}

impl Default for Interlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Interlock {
    pub const fn new() -> Self {
        Self {
            holder: AtomicU32::new(NO_HOLDER),
        }
    }

    pub fn try_obtain(&self, cpu: CpuId) -> Option<InterlockGuard<'_>> {
        self.holder
            .compare_exchange(
                NO_HOLDER,
                u32::from(cpu),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| InterlockGuard { lock: self, cpu })
    }

    /// Wait for the interlock, however long the holder keeps it.
    #[track_caller]
    pub fn obtain(&self, cpu: CpuId) -> InterlockGuard<'_> {
        if self.is_held_by(cpu) {
            logic_error!("cpu {cpu} tried to obtain the interlock it already holds");
        }
        let mut backoff = Backoff::unbounded();
        loop {
            if let Some(guard) = self.try_obtain(cpu) {
                return guard;
            }
            backoff.snooze();
        }
    }

    pub fn holder(&self) -> Option<CpuId> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            cpu => Some(cpu as CpuId),
        }
    }

    #[inline]
    pub fn is_held_by(&self, cpu: CpuId) -> bool {
        self.holder.load(Ordering::Acquire) == u32::from(cpu)
    }
}

/// Releases the interlock when dropped.
#[derive(Debug)]
#[must_use = "the interlock is released as soon as the guard is dropped"]
pub struct InterlockGuard<'a> {
    lock: &'a Interlock,
    cpu: CpuId,
}

impl InterlockGuard<'_> {
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }
}

impl Drop for InterlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.holder.store(NO_HOLDER, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_holds_until_dropped() {
        let lock = Interlock::new();
        let guard = lock.obtain(3);
        assert_eq!(guard.cpu(), 3);
        assert!(lock.is_held_by(3));
        assert!(!lock.is_held_by(2));
        assert!(lock.try_obtain(2).is_none());

        drop(guard);
        assert_eq!(lock.holder(), None);
        assert!(lock.try_obtain(2).is_some());
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn recursive_obtain_is_a_logic_error() {
        let lock = Interlock::new();
        let _guard = lock.obtain(1);
        let _again = lock.obtain(1);
    }

    #[test]
    fn holders_are_mutually_exclusive() {
        let lock = Arc::new(Interlock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4u16)
            .map(|cpu| {
                let lock = lock.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = lock.obtain(cpu);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(lock.holder(), None);
    }
}
